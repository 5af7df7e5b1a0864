//! Content-addressed, chunked packaging of large artifacts ("genes") with
//! resumable uploads to a remote gene store.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod pack;
pub mod progress;
pub mod store;
pub mod transfer;

pub use error::{GeneError, Result};
pub use pack::{GeneId, GenePacker, Manifest, PackRequest, PackedGene, PackerConfig};
pub use store::GeneStore;
