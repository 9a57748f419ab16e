//! Extract and embed XMP metadata packets in image containers.
//!
//! Each supported container gets a walker that parses the file as a
//! sequence of typed regions, recognizes the XMP-carrying region, and for
//! writes produces a copy of a reference file with that region replaced or
//! inserted and every other byte preserved. Supported containers: GIF
//! (87a/89a), the ISO Base Media family (JPEG2000, HEIC, AVIF), JPEG
//! (including extended XMP), PNG, WebP, TIFF (read only), and a generic
//! packet-scanning fallback for everything else.
//!
//! The XMP payload itself is treated as opaque text: parsing or validating
//! the RDF inside it is someone else's job. What this crate does manage is
//! the packet wrapper (the `<?xpacket …?>` processing instructions and
//! whitespace padding), chunk checksums, RIFF totals, and the other
//! structural invariants of each container.
//!
//! # Reading
//!
//! ```rust,no_run
//! # fn main() -> xmpembed::XmpResult<()> {
//! let data = xmpembed::read_png("photo.png")?;
//! if let Some(dims) = data.dimensions {
//!     println!("{}x{}", dims.width, dims.height);
//! }
//! for packet in &data.packets {
//!     println!("{}", packet);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Writing
//!
//! Writers take a reference file and a destination that must not exist yet;
//! the destination is removed again if anything goes wrong.
//!
//! ```rust,no_run
//! # fn main() -> xmpembed::XmpResult<()> {
//! xmpembed::write_png("photo.png", "tagged.png", "<x:xmpmeta/>")?;
//! # Ok(())
//! # }
//! ```

pub mod crc32;
pub mod error;
mod file;
pub mod formats;
mod handler;
pub mod io;
pub mod packet;

pub use error::{XmpError, XmpResult};
pub use file::{
    read_bmff, read_file, read_gif, read_jpeg, read_png, read_scan, read_tiff, read_webp,
    write_bmff, write_file, write_gif, write_jpeg, write_jpeg_ext, write_png, write_scan,
    write_webp,
};
pub use formats::bmff::BmffHandler;
pub use formats::gif::GifHandler;
pub use formats::jpeg::{extended_xmp_guid, JpegHandler};
pub use formats::png::PngHandler;
pub use formats::scan::ScanHandler;
pub use formats::tiff::TiffHandler;
pub use formats::webp::WebpHandler;
pub use handler::{Dimensions, FileHandler, WriteOptions, XmpData};
