//! Content negotiation
//!
//! Selects a (view, format) pair from client preferences and the views a
//! class offers. The same resolver runs for live requests and for the
//! harvester, so harvested output matches what a client would receive.
//!
//! # Precedence
//!
//! ```text
//!   _view ──────────► view token ──(absent)──► class default view
//!                          │
//!                          ▼
//!   _format ──(present)──► must be supported ──(no)──► UnsupportedFormat
//!      │
//!   (absent)
//!      ▼
//!   Accept ──► ranked media ranges ──► first supported match
//!                                          │
//!                                  (none / */* / missing)
//!                                          ▼
//!                                 view default format
//! ```

pub mod media;
pub mod resolver;
pub mod view;

pub use media::{normalize_mime, parse_accept, refused_ranges, MediaRange};
pub use resolver::{resolve, Format, Negotiated, NegotiationRequest, Origin, INTERNAL_FORMAT};
pub use view::{View, ViewSet, ALTERNATES_VIEW, LISTING_VIEW};
