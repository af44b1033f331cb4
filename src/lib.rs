//! imgsquash - container image layer squashing
//!
//! rewrites an image tar archive so that a contiguous suffix of its layer
//! history collapses into a single layer, preserving whiteout deletions and
//! producing a valid replacement archive.
//!
//! # Core concepts
//!
//! - **Layer**: one named delta in an image; a tar of filesystem changes
//!   plus a metadata record
//! - **Whiteout**: a `.wh.`-prefixed entry marking the like-named sibling as
//!   deleted relative to lower layers
//! - **Squash**: replacing a suffix of the layer chain with one layer whose
//!   content equals the overlay of the suffix
//! - **Staging directory**: the scratch directory where the input archive is
//!   expanded and the output archive is assembled
//!
//! # Example usage
//!
//! ```no_run
//! use imgsquash::{history, CancelToken, ImageArchive, Staging, StartPolicy};
//!
//! let cancel = CancelToken::new();
//! let staging = Staging::new().unwrap();
//!
//! // expand an image archive into staging, then load the layer graph
//! let input = std::fs::File::open("image.tar").unwrap();
//! imgsquash::tarball::unpack(input, staging.path(), cancel).unwrap();
//! let mut archive = ImageArchive::load(staging.path()).unwrap();
//!
//! // pick a start, squash everything below it, write the result
//! let start = history::select_start(&archive, &StartPolicy::First).unwrap();
//! let target = archive.insert_after(&start).unwrap();
//! imgsquash::squash::squash(&mut archive, &target, cancel).unwrap();
//! let output = std::fs::File::create("squashed.tar").unwrap();
//! imgsquash::assemble::write_image(&mut archive, None, output, cancel).unwrap();
//! ```

mod archive;
mod cancel;
mod error;
mod id;
mod layer;
mod metadata;
mod staging;

pub mod assemble;
pub mod history;
pub mod manifest;
pub mod squash;
pub mod tarball;

pub use archive::{ImageArchive, REPOSITORIES_FILE};
pub use assemble::{write_image, ImageTag};
pub use cancel::CancelToken;
pub use error::{Error, IoResultExt, Result};
pub use history::{classify, select_start, LayerKind, StartPolicy, ROOT_TOKEN};
pub use layer::Layer;
pub use manifest::{Manifest, MANIFEST_FILE};
pub use metadata::{ContainerConfig, LayerConfig, Repositories};
pub use staging::Staging;
