//! Built-in catalog for the address gazetteer
//!
//! Addresses are by far the largest register, so they rotate shards at a
//! much coarser threshold than the smaller registers.

use crate::catalog::{EntityClass, RegisterCatalog, RegisterDescriptor, DEFAULT_PAGE_SIZE};
use crate::negotiate::{View, ViewSet, LISTING_VIEW};

const DATASET: &str = "http://linked.data.gov.au/dataset/gnaf/";

const GNAF_NS: &str = "http://linked.data.gov.au/def/gnaf#";
const ISO19160_NS: &str = "http://linked.data.gov.au/def/iso19160-1-address#";
const SCHEMA_NS: &str = "https://schema.org/";
const DCT_NS: &str = "http://purl.org/dc/terms/";
const REG_NS: &str = "http://purl.org/linked-data/registry#";

const RDF_FORMATS: &[&str] = &["text/turtle", "application/n-triples", "application/ld+json"];

/// Records per shard for the address register
pub const ADDRESS_SHARD_THRESHOLD: usize = 50_000;

/// Records per shard for the smaller registers
pub const SMALL_SHARD_THRESHOLD: usize = 5_000;

fn gnaf_view() -> View {
    View::new("gnaf", "G-NAF Ontology", GNAF_NS, RDF_FORMATS)
}

fn dct_view() -> View {
    View::new("dct", "Dublin Core Terms", DCT_NS, RDF_FORMATS)
}

fn schemaorg_view() -> View {
    View::new(
        "schemaorg",
        "schema.org markup",
        SCHEMA_NS,
        &["application/ld+json", "text/turtle"],
    )
}

fn iso19160_view() -> View {
    View::new("ISO19160", "ISO 19160-1 Address", ISO19160_NS, RDF_FORMATS)
}

struct ClassSpec {
    name: &'static str,
    local: &'static str,
    label: &'static str,
    table: &'static str,
    id_column: &'static str,
    label_column: Option<&'static str>,
    views: fn() -> Vec<View>,
    threshold: usize,
}

const CLASSES: &[ClassSpec] = &[
    ClassSpec {
        name: "address",
        local: "Address",
        label: "Addresses",
        table: "address_detail",
        id_column: "address_detail_pid",
        label_column: None,
        views: || vec![gnaf_view(), iso19160_view(), schemaorg_view(), dct_view()],
        threshold: ADDRESS_SHARD_THRESHOLD,
    },
    ClassSpec {
        name: "locality",
        local: "Locality",
        label: "Localities",
        table: "locality",
        id_column: "locality_pid",
        label_column: Some("locality_name"),
        views: || vec![gnaf_view(), schemaorg_view(), dct_view()],
        threshold: SMALL_SHARD_THRESHOLD,
    },
    ClassSpec {
        name: "street_locality",
        local: "StreetLocality",
        label: "Street Localities",
        table: "street_locality",
        id_column: "street_locality_pid",
        label_column: Some("street_name"),
        views: || vec![gnaf_view(), dct_view()],
        threshold: SMALL_SHARD_THRESHOLD,
    },
    ClassSpec {
        name: "address_site",
        local: "AddressSite",
        label: "Address Sites",
        table: "address_site",
        id_column: "address_site_pid",
        label_column: Some("address_site_name"),
        views: || vec![gnaf_view(), dct_view()],
        threshold: SMALL_SHARD_THRESHOLD,
    },
];

/// The gazetteer's classes and registers
pub fn catalog() -> RegisterCatalog {
    let mut classes = Vec::with_capacity(CLASSES.len());
    let mut registers = Vec::with_capacity(CLASSES.len());

    for entry in CLASSES {
        let class_uri = format!("{}{}", GNAF_NS, entry.local);
        classes.push(EntityClass {
            name: entry.name.to_string(),
            class_uri: class_uri.clone(),
            label: entry.label.to_string(),
            table: entry.table.to_string(),
            id_column: entry.id_column.to_string(),
            label_column: entry.label_column.map(str::to_string),
            views: ViewSet::new("gnaf", (entry.views)()),
            shard_threshold: entry.threshold,
        });
        registers.push(RegisterDescriptor {
            name: entry.name.to_string(),
            label: format!("{} Register", entry.label),
            base_uri: format!("{}{}/", DATASET, entry.name),
            entity_class_uri: class_uri,
            page_size: DEFAULT_PAGE_SIZE,
            total_count: None,
        });
    }

    RegisterCatalog {
        uri: DATASET.to_string(),
        label: "G-NAF Register of Registers".to_string(),
        register_views: ViewSet::new(
            LISTING_VIEW,
            vec![View::new(LISTING_VIEW, "Register listing", REG_NS, RDF_FORMATS)],
        ),
        classes,
        registers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_rotates_coarser() {
        let catalog = catalog();
        let address = catalog.classes.iter().find(|c| c.name == "address").unwrap();
        let locality = catalog.classes.iter().find(|c| c.name == "locality").unwrap();
        assert!(address.shard_threshold > locality.shard_threshold);
        assert!(address.views.get("ISO19160").is_some());
        assert!(locality.views.get("ISO19160").is_none());
    }
}
