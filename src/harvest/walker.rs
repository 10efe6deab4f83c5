//! Register enumeration
//!
//! A register is walked page by page through the listing view, exactly as
//! a client would page through it. The first empty page ends the walk. If
//! the register advertised a member count and the empty page arrives
//! before that many identifiers were seen, the walk fails instead.

use crate::catalog::RegisterDescriptor;
use crate::error::{ServiceResult, WalkError};
use crate::negotiate::{NegotiationRequest, INTERNAL_FORMAT, LISTING_VIEW};
use crate::render::Representation;
use crate::service::Service;
use crate::source::{Identifier, RecordSource, RetryPolicy};
use tracing::{debug, info};

/// Anything that can serve numbered listing pages
pub trait PageSource {
    /// Fetch one page (numbered from 1)
    fn fetch_page(&mut self, register: &str, page: u64, per_page: usize) -> ServiceResult<Representation>;
}

/// Listing pages served in-process by [`Service::list_register`]
pub struct ServicePages<'a> {
    service: &'a Service,
    source: &'a mut dyn RecordSource,
    retry: RetryPolicy,
}

impl<'a> ServicePages<'a> {
    pub fn new(service: &'a Service, source: &'a mut dyn RecordSource, retry: RetryPolicy) -> Self {
        Self { service, source, retry }
    }
}

impl PageSource for ServicePages<'_> {
    fn fetch_page(&mut self, register: &str, page: u64, per_page: usize) -> ServiceResult<Representation> {
        let request = NegotiationRequest::in_process(Some(LISTING_VIEW), Some(INTERNAL_FORMAT));
        let service = self.service;
        let source = &mut *self.source;
        self.retry
            .run(|| service.list_register(&mut *source, register, &request, page, per_page))
    }
}

/// Lazy iterator over the non-empty pages of a register
pub struct RegisterWalker<'a, P: PageSource + ?Sized> {
    pages: &'a mut P,
    register: String,
    per_page: usize,
    expected: Option<u64>,
    next_page: u64,
    seen: u64,
    calls: u64,
    done: bool,
}

impl<'a, P: PageSource + ?Sized> RegisterWalker<'a, P> {
    pub fn new(pages: &'a mut P, descriptor: &RegisterDescriptor, per_page: usize) -> Self {
        Self {
            pages,
            register: descriptor.name.clone(),
            per_page: per_page.max(1),
            expected: descriptor.total_count,
            next_page: 1,
            seen: 0,
            calls: 0,
            done: false,
        }
    }

    /// Page requests issued so far, including the terminating one
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Identifiers yielded so far
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl<P: PageSource + ?Sized> Iterator for RegisterWalker<'_, P> {
    type Item = Result<Vec<Identifier>, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let page = self.next_page;
        self.calls += 1;

        let ids: Vec<Identifier> = match self.pages.fetch_page(&self.register, page, self.per_page) {
            Ok(Representation::Listing(items)) => items.into_iter().map(|i| i.identifier).collect(),
            Ok(_) => {
                self.done = true;
                return Some(Err(WalkError::UnexpectedRepresentation {
                    register: self.register.clone(),
                    page,
                }));
            }
            Err(source) => {
                self.done = true;
                return Some(Err(WalkError::Page {
                    register: self.register.clone(),
                    page,
                    source,
                }));
            }
        };

        if ids.is_empty() {
            self.done = true;
            return match self.expected {
                Some(expected) if self.seen < expected => Some(Err(WalkError::PrematureEnd {
                    register: self.register.clone(),
                    page,
                    seen: self.seen,
                    expected,
                })),
                _ => None,
            };
        }

        debug!(register = %self.register, page, ids = ids.len(), "Fetched listing page");
        self.seen += ids.len() as u64;
        self.next_page += 1;
        Some(Ok(ids))
    }
}

/// Walk a register to exhaustion, collecting every identifier in order
pub fn enumerate_register<P: PageSource + ?Sized>(
    pages: &mut P,
    descriptor: &RegisterDescriptor,
    per_page: usize,
) -> Result<Vec<Identifier>, WalkError> {
    let capacity = descriptor.total_count.unwrap_or(0).min(50_000_000) as usize;
    let mut ids = Vec::with_capacity(capacity);

    let mut walker = RegisterWalker::new(pages, descriptor, per_page);
    for page in walker.by_ref() {
        ids.extend(page?);
    }

    info!(
        register = %descriptor.name,
        identifiers = ids.len(),
        pages = walker.calls(),
        "Register enumerated"
    );
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::gazetteer;
    use crate::error::{ServiceError, SourceError};
    use crate::render::ListingItem;

    /// Serves `size` identifiers, optionally failing or going empty on one page
    struct FakePages {
        size: usize,
        fail_on: Option<u64>,
        empty_on: Option<u64>,
        calls: u64,
    }

    impl FakePages {
        fn new(size: usize) -> Self {
            Self {
                size,
                fail_on: None,
                empty_on: None,
                calls: 0,
            }
        }
    }

    impl PageSource for FakePages {
        fn fetch_page(&mut self, _register: &str, page: u64, per_page: usize) -> ServiceResult<Representation> {
            self.calls += 1;
            if self.fail_on == Some(page) {
                return Err(ServiceError::Source(SourceError::Query {
                    table: "address_detail".into(),
                    reason: "disk I/O error".into(),
                }));
            }
            if self.empty_on == Some(page) {
                return Ok(Representation::Listing(Vec::new()));
            }
            let start = (page as usize - 1) * per_page;
            let end = (start + per_page).min(self.size);
            let items = (start.min(end)..end)
                .map(|i| ListingItem {
                    uri: format!("http://x/{}", i),
                    label: i.to_string(),
                    identifier: format!("ID{:05}", i),
                })
                .collect();
            Ok(Representation::Listing(items))
        }
    }

    fn descriptor(total: Option<u64>) -> RegisterDescriptor {
        let mut d = gazetteer::catalog().register("address").unwrap().clone();
        d.total_count = total;
        d
    }

    #[test]
    fn test_pages_of_2500() {
        let mut pages = FakePages::new(2500);
        let d = descriptor(None);
        let mut walker = RegisterWalker::new(&mut pages, &d, 1000);
        let sizes: Vec<usize> = walker.by_ref().map(|p| p.unwrap().len()).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(walker.calls(), 4);
    }

    #[test]
    fn test_exact_multiple_call_count() {
        let mut pages = FakePages::new(3000);
        let ids = enumerate_register(&mut pages, &descriptor(None), 1000).unwrap();
        assert_eq!(ids.len(), 3000);
        assert_eq!(pages.calls, 3000 / 1000 + 1);
        assert_eq!(ids[0], "ID00000");
        assert_eq!(ids[2999], "ID02999");
    }

    #[test]
    fn test_empty_register_one_call() {
        let mut pages = FakePages::new(0);
        let ids = enumerate_register(&mut pages, &descriptor(None), 100).unwrap();
        assert!(ids.is_empty());
        assert_eq!(pages.calls, 1);
    }

    #[test]
    fn test_erroring_page_is_hard_error() {
        let mut pages = FakePages::new(2500);
        pages.fail_on = Some(2);
        let err = enumerate_register(&mut pages, &descriptor(None), 1000).unwrap_err();
        assert!(matches!(err, WalkError::Page { page: 2, .. }));
        assert_eq!(pages.calls, 2);
    }

    #[test]
    fn test_premature_end_against_advertised_count() {
        let mut pages = FakePages::new(2500);
        pages.empty_on = Some(2);
        let err = enumerate_register(&mut pages, &descriptor(Some(2500)), 1000).unwrap_err();
        match err {
            WalkError::PrematureEnd { seen, expected, page, .. } => {
                assert_eq!(seen, 1000);
                assert_eq!(expected, 2500);
                assert_eq!(page, 2);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Without an advertised count the same page ends the walk normally
        let mut pages = FakePages::new(2500);
        pages.empty_on = Some(2);
        assert_eq!(enumerate_register(&mut pages, &descriptor(None), 1000).unwrap().len(), 1000);
    }

    #[test]
    fn test_non_listing_representation() {
        struct GraphPages;
        impl PageSource for GraphPages {
            fn fetch_page(&mut self, _: &str, _: u64, _: usize) -> ServiceResult<Representation> {
                Ok(Representation::Graph(Default::default()))
            }
        }
        let err = enumerate_register(&mut GraphPages, &descriptor(None), 10).unwrap_err();
        assert!(matches!(err, WalkError::UnexpectedRepresentation { page: 1, .. }));
    }
}
