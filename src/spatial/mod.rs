//! Spatial indexing of live cells

pub mod quadtree;

pub use quadtree::QuadTree;
