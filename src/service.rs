//! Shared negotiation-plus-render path
//!
//! Live requests ([`Service::respond`]) and the harvester
//! ([`Service::represent`], [`Service::list_register`]) go through the same
//! functions. The only difference is the request origin: the internal
//! format is reserved for in-process callers.

use crate::catalog::{EntityClass, RegisterCatalog, RegisterDescriptor};
use crate::error::{RenderError, ServiceError, ServiceResult};
use crate::negotiate::{resolve, Format, Negotiated, NegotiationRequest, ALTERNATES_VIEW};
use crate::render::{alternates_graph, serialize, EntityRenderer, Graph, ListingItem, Representation};
use crate::source::RecordSource;
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest page a listing request may ask for
pub const MAX_PER_PAGE: usize = 10_000;

/// Query parameters of a live request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    /// `_view`
    pub view: Option<String>,

    /// `_format`
    pub format: Option<String>,

    /// `page` (1-based)
    pub page: Option<u64>,

    /// `per_page`
    pub per_page: Option<usize>,
}

/// A response for the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Catalog plus renderer: everything needed to answer a request
#[derive(Clone)]
pub struct Service {
    catalog: Arc<RegisterCatalog>,
    renderer: Arc<EntityRenderer>,
}

impl Service {
    pub fn new(catalog: Arc<RegisterCatalog>, renderer: Arc<EntityRenderer>) -> Self {
        Self { catalog, renderer }
    }

    pub fn catalog(&self) -> &RegisterCatalog {
        &self.catalog
    }

    /// Register and member class for a register name
    pub fn lookup(&self, register: &str) -> ServiceResult<(&RegisterDescriptor, &EntityClass)> {
        let descriptor = self
            .catalog
            .register(register)
            .ok_or_else(|| ServiceError::UnknownRegister(register.to_string()))?;
        let class = self
            .catalog
            .class_for(descriptor)
            .ok_or_else(|| ServiceError::UnknownClass(descriptor.entity_class_uri.clone()))?;
        Ok((descriptor, class))
    }

    /// Resolve view and format for a register's members without touching data
    pub fn preflight(&self, register: &str, request: &NegotiationRequest<'_>) -> ServiceResult<Negotiated> {
        let (_, class) = self.lookup(register)?;
        Ok(resolve(request, &class.views)?)
    }

    /// Representation of one register member
    pub fn represent(
        &self,
        source: &mut dyn RecordSource,
        register: &str,
        id: &str,
        request: &NegotiationRequest<'_>,
    ) -> ServiceResult<Representation> {
        let (descriptor, class) = self.lookup(register)?;
        let negotiated = resolve(request, &class.views)?;
        let view = class
            .views
            .get(&negotiated.view)
            .ok_or_else(|| ServiceError::UnknownClass(class.class_uri.clone()))?;

        let record = source.fetch(class, id)?.ok_or_else(|| ServiceError::NotFound {
            class: class.name.clone(),
            id: id.to_string(),
        })?;

        let uri = descriptor.instance_uri(id);
        let graph = self.renderer.build(class, view, &uri, &record)?;
        finish_graph(graph, &negotiated.format)
    }

    /// One page of a register's members
    pub fn list_register(
        &self,
        source: &mut dyn RecordSource,
        register: &str,
        request: &NegotiationRequest<'_>,
        page: u64,
        per_page: usize,
    ) -> ServiceResult<Representation> {
        let (descriptor, class) = self.lookup(register)?;
        let negotiated = resolve(request, &self.catalog.register_views)?;
        check_paging(page, per_page)?;

        if negotiated.view == ALTERNATES_VIEW {
            let graph = alternates_graph(&self.catalog.register_views, &descriptor.base_uri);
            return finish_graph(graph, &negotiated.format);
        }

        let offset = (page - 1).saturating_mul(per_page as u64);
        let rows = source.list(class, offset, per_page)?;
        let items: Vec<ListingItem> = rows
            .into_iter()
            .map(|row| ListingItem {
                uri: descriptor.instance_uri(&row.id),
                label: row.label.unwrap_or_else(|| row.id.clone()),
                identifier: row.id,
            })
            .collect();

        debug!(register, page, per_page, items = items.len(), "Listed register page");
        self.finish_listing(&descriptor.base_uri, &class.class_uri, items, &negotiated.format)
    }

    /// The register of registers
    pub fn list_registers(&self, request: &NegotiationRequest<'_>) -> ServiceResult<Representation> {
        let negotiated = resolve(request, &self.catalog.register_views)?;
        if negotiated.view == ALTERNATES_VIEW {
            let graph = alternates_graph(&self.catalog.register_views, &self.catalog.uri);
            return finish_graph(graph, &negotiated.format);
        }

        let items = self
            .catalog
            .registers
            .iter()
            .map(|r| ListingItem {
                uri: r.base_uri.clone(),
                label: r.label.clone(),
                identifier: r.name.clone(),
            })
            .collect();
        self.finish_listing(
            &self.catalog.uri,
            crate::render::vocab::REG_REGISTER,
            items,
            &negotiated.format,
        )
    }

    /// Live request handler
    ///
    /// `register == None` lists registers, `id == None` lists a register,
    /// otherwise one member is represented. Errors become JSON bodies.
    pub fn respond(
        &self,
        source: &mut dyn RecordSource,
        register: Option<&str>,
        id: Option<&str>,
        params: &QueryParams,
        accept: Option<&str>,
    ) -> HttpResponse {
        let request = NegotiationRequest::external(params.view.as_deref(), params.format.as_deref(), accept);

        let result = match (register, id) {
            (None, _) => self.list_registers(&request),
            (Some(register), None) => {
                let per_page = params.per_page.unwrap_or_else(|| {
                    self.catalog
                        .register(register)
                        .map_or(crate::catalog::DEFAULT_PAGE_SIZE, |r| r.page_size)
                });
                self.list_register(source, register, &request, params.page.unwrap_or(1), per_page)
            }
            (Some(register), Some(id)) => self.represent(source, register, id, &request),
        };

        match result {
            Ok(Representation::Serialized { mimetype, body }) => HttpResponse {
                status: 200,
                content_type: mimetype,
                body,
            },
            Ok(_) => error_response(&ServiceError::Render(RenderError::UnsupportedFormat {
                format: crate::negotiate::INTERNAL_FORMAT.to_string(),
            })),
            Err(e) => {
                if e.status_code() >= 500 {
                    warn!(register = ?register, id = ?id, error = %e, "Request failed");
                } else {
                    debug!(register = ?register, id = ?id, error = %e, "Request rejected");
                }
                error_response(&e)
            }
        }
    }

    fn finish_listing(
        &self,
        register_uri: &str,
        member_class: &str,
        items: Vec<ListingItem>,
        format: &Format,
    ) -> ServiceResult<Representation> {
        match format {
            Format::Internal => Ok(Representation::Listing(items)),
            Format::Media(_) => {
                let graph = self.renderer.listing_graph(register_uri, member_class, &items);
                finish_graph(graph, format)
            }
        }
    }
}

fn finish_graph(graph: Graph, format: &Format) -> ServiceResult<Representation> {
    match format {
        Format::Internal => Ok(Representation::Graph(graph)),
        Format::Media(mimetype) => Ok(Representation::Serialized {
            body: serialize(&graph, mimetype)?,
            mimetype: mimetype.clone(),
        }),
    }
}

fn check_paging(page: u64, per_page: usize) -> ServiceResult<()> {
    if page == 0 {
        return Err(ServiceError::InvalidParameter {
            name: "page".into(),
            reason: "pages are numbered from 1".into(),
        });
    }
    if per_page == 0 || per_page > MAX_PER_PAGE {
        return Err(ServiceError::InvalidParameter {
            name: "per_page".into(),
            reason: format!("must be between 1 and {}", MAX_PER_PAGE),
        });
    }
    Ok(())
}

fn error_response(error: &ServiceError) -> HttpResponse {
    HttpResponse {
        status: error.status_code(),
        content_type: "application/json".to_string(),
        body: serde_json::to_vec(&error.to_response()).unwrap_or_default(),
    }
}
