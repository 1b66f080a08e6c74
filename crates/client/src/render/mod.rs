mod raster;

pub use raster::RasterSurface;
