//! Overview assembly from a dense low-magnification tile set.
//!
//! Tiles are acquired row by row in snake order, each row moving along the
//! stage y axis and rows stepping along x. The stitcher undoes the snake and
//! lays tiles out so that image x follows stage x:
//!
//! ```text
//!  acquisition order (3 rows x 3 columns)      overview layout
//!
//!   row 0:  1 → 2 → 3                         ┌────┬────┬────┐
//!   row 1:  6 ← 5 ← 4                         │ 1  │ 6  │ 7  │
//!   row 2:  7 → 8 → 9                         ├────┼────┼────┤
//!                                             │ 2  │ 5  │ 8  │
//!                                             ├────┼────┼────┤
//!                                             │ 3  │ 4  │ 9  │
//!                                             └────┴────┴────┘
//! ```
//!
//! Each tile keeps its leading `width - trim_x` by `height - trim_y` window;
//! the trimmed trailing margin is the overlap with the next tile.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info};

use crate::error::StitchError;
use crate::storage::sorted_files;
use crate::tile::{downscale, read_rgb, JpegTileEncoder};

/// Size of the compressed overview used for annotation and transport.
pub const COMPRESSED_OVERVIEW_SIZE: (u32, u32) = (2000, 2000);

/// Parameters of the dense grid and the overlap trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StitchSettings {
    pub rows: usize,
    pub columns: usize,
    /// Integer shrink factor applied to every tile before trimming
    pub downscale: u32,
    /// Pixels removed from the trailing x edge of each downscaled tile
    pub trim_x: u32,
    /// Pixels removed from the trailing y edge of each downscaled tile
    pub trim_y: u32,
    /// Tiles are round-tripped through JPEG at this quality before stitching
    pub jpeg_quality: Option<u8>,
}

impl Default for StitchSettings {
    fn default() -> Self {
        Self {
            rows: 21,
            columns: 31,
            downscale: 4,
            trim_x: 77,
            trim_y: 27,
            jpeg_quality: Some(80),
        }
    }
}

/// Assembles one overview image from a complete dense tile set.
#[derive(Debug, Clone)]
pub struct ImageStitcher {
    settings: StitchSettings,
}

impl ImageStitcher {
    pub fn new(settings: StitchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StitchSettings {
        &self.settings
    }

    /// Stitch the image files of `dir`.
    ///
    /// File names are sorted naturally, so `2.png` precedes `10.png`
    /// whatever order the filesystem lists them in. Tiles are decoded one at
    /// a time.
    pub fn stitch_directory(&self, dir: &Path) -> Result<RgbImage, StitchError> {
        let names: Vec<String> = sorted_files(dir)?
            .into_iter()
            .filter(|name| is_image_file(name))
            .collect();
        info!(dir = %dir.display(), tiles = names.len(), "Stitching overview");

        self.assemble(names.len(), |index| {
            let name = &names[index];
            Ok((name.clone(), read_rgb(&dir.join(name))?))
        })
    }

    /// Stitch tiles given in acquisition order.
    pub fn stitch_tiles(&self, tiles: &[RgbImage]) -> Result<RgbImage, StitchError> {
        self.assemble(tiles.len(), |index| Ok((index.to_string(), tiles[index].clone())))
    }

    fn assemble<F>(&self, count: usize, mut load: F) -> Result<RgbImage, StitchError>
    where
        F: FnMut(usize) -> Result<(String, RgbImage), StitchError>,
    {
        let StitchSettings {
            rows,
            columns,
            trim_x,
            trim_y,
            ..
        } = self.settings;

        let expected = rows * columns;
        if count != expected || expected == 0 {
            return Err(StitchError::TileCount {
                expected,
                found: count,
                rows,
                columns,
            });
        }

        // The first tile fixes the geometry for the whole set
        let (id, raw) = load(0)?;
        let first = self.prepare(&id, &raw)?;
        let (width, height) = first.dimensions();
        if trim_x >= width || trim_y >= height {
            return Err(StitchError::TrimTooLarge {
                trim_x,
                trim_y,
                width,
                height,
            });
        }
        let crop = (width - trim_x, height - trim_y);
        debug!(
            tile_width = width,
            tile_height = height,
            crop_width = crop.0,
            crop_height = crop.1,
            "Overview tile geometry"
        );

        let mut canvas = RgbImage::new(crop.0 * rows as u32, crop.1 * columns as u32);
        self.place(&mut canvas, 0, &first, crop);

        for index in 1..count {
            let (id, raw) = load(index)?;
            let tile = self.prepare(&id, &raw)?;
            if tile.dimensions() != (width, height) {
                return Err(StitchError::TileDimensions {
                    id,
                    width: tile.width(),
                    height: tile.height(),
                    expected_width: width,
                    expected_height: height,
                });
            }
            self.place(&mut canvas, index, &tile, crop);
        }

        Ok(canvas)
    }

    /// Copy the leading window of the `index`-th acquired tile into place.
    fn place(&self, canvas: &mut RgbImage, index: usize, tile: &RgbImage, crop: (u32, u32)) {
        let columns = self.settings.columns;
        let row = index / columns;
        let step = index % columns;
        let column = if row % 2 == 1 { columns - 1 - step } else { step };

        let window = imageops::crop_imm(tile, 0, 0, crop.0, crop.1).to_image();
        imageops::replace(
            canvas,
            &window,
            row as i64 * crop.0 as i64,
            column as i64 * crop.1 as i64,
        );
    }

    fn prepare(&self, id: &str, tile: &RgbImage) -> Result<RgbImage, StitchError> {
        let small = downscale(tile, self.settings.downscale);
        match self.settings.jpeg_quality {
            Some(quality) => JpegTileEncoder::new(quality)
                .compress(&small)
                .map_err(|e| StitchError::TileCodec {
                    id: id.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(small),
        }
    }
}

/// Resize the overview to [`COMPRESSED_OVERVIEW_SIZE`].
pub fn compress_overview(overview: &RgbImage) -> RgbImage {
    let (width, height) = COMPRESSED_OVERVIEW_SIZE;
    imageops::resize(overview, width, height, FilterType::Triangle)
}

fn is_image_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".png") || lower.ends_with(".jpg") || lower.ends_with(".jpeg")
}
