//! Asset loading.
//!
//! - OBJ meshes, deduplicated into indexed vertex data
//! - Image files, decoded to RGBA8

mod error;

pub mod model;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use model::{Mesh, MeshBuilder, load_mesh};
pub use texture::{TextureData, load_texture};
