//! Client engine for a shared pixel board.
//!
//! Every participant sees the same W×H grid of palette indices. A paint is
//! applied locally first, then published; paints from other clients arrive
//! over an event stream and go through the same apply path. The crate
//! compiles natively (tests, the CLI) and to WebAssembly, where [`web`]
//! mounts it on an HTML canvas.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Testable [`engine::EngineCore`]: input dispatch over the modules below |
//! | [`palette`] | Color table; index is the wire representation |
//! | [`store`] | Dense one-byte-per-cell board state |
//! | [`raster`] | RGBA bitmap mirror of the store with damage tracking |
//! | [`replica`] | Store + raster behind a single apply path |
//! | [`camera`] | Pan/zoom camera and coordinate conversions |
//! | [`overlay`] | Client-local guidance image with memoized pixelation |
//! | [`render`] | Frame composition over a `Surface` and the render loop |
//! | [`soft`] | In-memory `Surface` used by tests and headless export |
//! | [`input`] | Input event types and the gesture state machine |
//! | [`sync`] | Backend gateway contract and the sync client |
//! | [`hub`] | In-process gateway for tests and offline use |
//! | [`config`] | Engine configuration |
//! | [`consts`] | Shared numeric constants (board size, zoom limits, colors) |

pub mod camera;
pub mod config;
pub mod consts;
pub mod engine;
pub mod hub;
pub mod input;
pub mod overlay;
pub mod palette;
pub mod raster;
pub mod render;
pub mod replica;
pub mod soft;
pub mod store;
pub mod sync;
#[cfg(target_arch = "wasm32")]
pub mod web;
