//! Area grids: which tiles cover a rendered region.

use serde::{Deserialize, Serialize};

use crate::tile::TileCoord;

/// Edge length of one upstream tile in pixels.
pub const TILE_SIZE_PX: u32 = 256;

/// A rectangular block of tiles at a fixed zoom level covering one
/// geographic area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaGrid {
    /// Short identifier used in paths and records (e.g. `utah`)
    pub code: String,
    pub zoom: u32,
    /// Column of the grid's north-west corner tile
    pub starting_x: u32,
    /// Row of the grid's north-west corner tile
    pub starting_y: u32,
    pub grid_width: u32,
    pub grid_height: u32,
}

impl AreaGrid {
    /// Number of tiles needed to fully cover the area. A timestep's tile
    /// set is complete only when it holds exactly this many tiles.
    pub fn tile_count(&self) -> usize {
        (self.grid_width * self.grid_height) as usize
    }

    /// Pixel width of the assembled mosaic canvas.
    pub fn canvas_width(&self) -> u32 {
        self.grid_width * TILE_SIZE_PX
    }

    /// Pixel height of the assembled mosaic canvas.
    pub fn canvas_height(&self) -> u32 {
        self.grid_height * TILE_SIZE_PX
    }

    /// Local (col, row) offset of an absolute tile coordinate, or `None`
    /// when the coordinate falls outside this grid.
    pub fn local_offset(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        let col = x.checked_sub(self.starting_x)?;
        let row = y.checked_sub(self.starting_y)?;
        (col < self.grid_width && row < self.grid_height).then_some((col, row))
    }

    /// All tile coordinates in the grid, column-major from the starting
    /// corner. The first coordinate is the grid's probe tile.
    pub fn coords(&self) -> Vec<TileCoord> {
        let mut coords = Vec::with_capacity(self.tile_count());
        for x in self.starting_x..self.starting_x + self.grid_width {
            for y in self.starting_y..self.starting_y + self.grid_height {
                coords.push(TileCoord::new(self.zoom, x, y));
            }
        }
        coords
    }
}
