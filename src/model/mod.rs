//! Core data records that travel through the crawler
//!
//! A [`Request`] is owned by the scheduler until it is fetched; the resulting
//! [`Response`] is dispatched to the site adapter that created the request; an
//! [`Item`] is owned by the pipeline from ingress until it is persisted.

mod item;
mod request;
mod response;

pub use item::{AnalysisReport, Item, ItemMeta, VersionData};
pub use request::{Callback, Method, Request};
pub use response::{Body, Response};
