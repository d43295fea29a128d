//! Mosaic assembly: compose tile buffers into a single canvas image.
//!
//! This is the boundary to the compositing engine: callers hand over raw
//! encoded tile buffers with their pixel offsets already computed, and get
//! back one PNG of the requested dimensions with a transparent background.

use std::io::Cursor;

use bytes::Bytes;
use image::{imageops, DynamicImage, ImageOutputFormat, RgbaImage};

use smoke_common::{ForecastError, ForecastResult};

/// One source image and the pixel offset where it lands on the canvas.
#[derive(Debug, Clone)]
pub struct MosaicPiece {
    pub data: Bytes,
    pub offset_x: u32,
    pub offset_y: u32,
}

/// Compose `pieces` onto a transparent canvas and return it as PNG bytes.
pub fn compose(pieces: &[MosaicPiece], width: u32, height: u32) -> ForecastResult<Vec<u8>> {
    let mut canvas = RgbaImage::new(width, height);

    for piece in pieces {
        let tile = image::load_from_memory(&piece.data)
            .map_err(|e| ForecastError::Mosaic(format!("tile decode failed: {e}")))?;
        imageops::overlay(
            &mut canvas,
            &tile.to_rgba8(),
            piece.offset_x as i64,
            piece.offset_y as i64,
        );
    }

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut out, ImageOutputFormat::Png)
        .map_err(|e| ForecastError::Mosaic(format!("png encode failed: {e}")))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const TILE: u32 = 4;

    fn solid_tile(color: [u8; 4]) -> Bytes {
        let tile = RgbaImage::from_pixel(TILE, TILE, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(tile)
            .write_to(&mut out, ImageOutputFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    #[test]
    fn test_round_trip_recovers_grid_offsets() {
        const W: u32 = 3;
        const H: u32 = 2;

        // One uniquely colored tile per grid cell, offsets pre-multiplied
        // by the tile size as the render pipeline does.
        let mut pieces = Vec::new();
        for col in 0..W {
            for row in 0..H {
                pieces.push(MosaicPiece {
                    data: solid_tile([col as u8 * 40 + 10, row as u8 * 40 + 10, 0, 255]),
                    offset_x: col * TILE,
                    offset_y: row * TILE,
                });
            }
        }

        let png = compose(&pieces, W * TILE, H * TILE).unwrap();
        let canvas = image::load_from_memory(&png).unwrap().to_rgba8();

        // Sampling each tile region and un-scaling by the tile size must
        // recover the original grid offset.
        for col in 0..W {
            for row in 0..H {
                let pixel = canvas.get_pixel(col * TILE + 1, row * TILE + 1);
                let recovered_col = (pixel[0] - 10) / 40;
                let recovered_row = (pixel[1] - 10) / 40;
                assert_eq!((recovered_col as u32, recovered_row as u32), (col, row));
            }
        }
    }

    #[test]
    fn test_uncovered_canvas_is_transparent() {
        let pieces = vec![MosaicPiece {
            data: solid_tile([255, 0, 0, 255]),
            offset_x: 0,
            offset_y: 0,
        }];

        let png = compose(&pieces, TILE * 2, TILE * 2).unwrap();
        let canvas = image::load_from_memory(&png).unwrap().to_rgba8();

        assert_eq!(canvas.get_pixel(1, 1)[3], 255);
        assert_eq!(canvas.get_pixel(TILE + 1, TILE + 1)[3], 0);
    }

    #[test]
    fn test_undecodable_tile_is_an_error() {
        let pieces = vec![MosaicPiece {
            data: Bytes::from_static(b"not a png"),
            offset_x: 0,
            offset_y: 0,
        }];

        let err = compose(&pieces, TILE, TILE).unwrap_err();
        assert!(matches!(err, ForecastError::Mosaic(_)));
    }
}
