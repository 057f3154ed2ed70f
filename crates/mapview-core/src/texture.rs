use image::RgbaImage;

use crate::error::MapviewResult;

/// GPU texture allocation capability.
///
/// Handles are owned by whoever holds them; `release` consumes the handle so
/// a texture cannot be released twice.
pub trait TextureStore {
    type Handle;

    fn upload(&mut self, image: &RgbaImage, label: &str) -> MapviewResult<Self::Handle>;

    fn release(&mut self, handle: Self::Handle);
}
