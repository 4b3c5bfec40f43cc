pub mod archive;
pub mod normalize;
pub mod outbound;
pub mod store;
pub mod transform;
