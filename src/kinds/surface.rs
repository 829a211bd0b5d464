//! Video memory surface types

use serde::{Deserialize, Serialize};

/// Usage category of a video memory surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum SurfaceType {
    /// Unclassified surface
    #[default]
    Unknown,
    /// Index buffer
    Index,
    /// Vertex buffer
    Vertex,
    /// Texture
    Texture,
    /// Render target
    RenderTarget,
    /// Depth buffer
    Depth,
    /// 2D bitmap
    Bitmap,
    /// Tile status buffer
    TileStatus,
    /// Image
    Image,
    /// Mask
    Mask,
    /// Scissor
    Scissor,
    /// Hierarchical depth buffer
    HierarchicalDepth,
}

/// Report names, indexed by [`SurfaceType::index`]
pub const SURFACE_TYPE_NAMES: [&str; SurfaceType::COUNT] = [
    "TYPE_UNKNOWN",
    "INDEX",
    "VERTEX",
    "TEXTURE",
    "RENDER_TARGET",
    "DEPTH",
    "BITMAP",
    "TILE_STATUS",
    "IMAGE",
    "MASK",
    "SCISSOR",
    "HIERARCHICAL_DEPTH",
];

impl SurfaceType {
    /// Number of surface types
    pub const COUNT: usize = 12;

    /// All surface types in index order
    pub const ALL: [SurfaceType; SurfaceType::COUNT] = [
        SurfaceType::Unknown,
        SurfaceType::Index,
        SurfaceType::Vertex,
        SurfaceType::Texture,
        SurfaceType::RenderTarget,
        SurfaceType::Depth,
        SurfaceType::Bitmap,
        SurfaceType::TileStatus,
        SurfaceType::Image,
        SurfaceType::Mask,
        SurfaceType::Scissor,
        SurfaceType::HierarchicalDepth,
    ];

    /// Counter slot of this type
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a type by raw index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Report name
    pub fn name(self) -> &'static str {
        SURFACE_TYPE_NAMES[self.index()]
    }
}

impl std::fmt::Display for SurfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
