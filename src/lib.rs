//! VGG + bidirectional LSTM acoustic encoder in pure Rust.
//!
//! A candle-based encoder that turns batches of spliced acoustic feature
//! frames (static + Δ + ΔΔ channels) into a time-indexed sequence of
//! hidden representations, with a choice of five recurrent backends.
//!
//! ## Architecture
//!
//! ```text
//! [B, T, C·S·3] ─→ reshape ─→ [B·T, 3, C, S]
//!   ─→ VGG stage 1 (3→64→64, BN, 2×2 pool)     [B·T, 64, ⌈C/2⌉, ⌈S/2⌉]
//!   ─→ VGG stage 2 (64→128→128, BN, 2×2 pool)  [B·T, 128, ⌈C/4⌉, ⌈S/4⌉]
//!   ─→ bridge: Linear(→256) + ReLU + dropout
//!   ─→ reshape ─→ [B, T, 256]
//!   ─→ N × bidirectional LSTM (basic | peephole | block | fused | cudnn)
//!   ─→ [B, T, out] + final state       ([T, B, out] when time-major)
//! ```
//!
//! ## Modules
//!
//! - [`config`] — hyperparameters, validation, backend selector
//! - [`vgg`] — convolutional front-end
//! - [`bridge`] — linear reduction + dropout
//! - [`rnn`] — the five recurrent backends and the bidirectional stack
//! - [`encoder`] — end-to-end assembly

pub mod bridge;
pub mod config;
pub mod encoder;
pub mod rnn;
pub mod vgg;

mod error;

pub use config::{CellKind, EncoderConfig};
pub use encoder::VggBlstmEncoder;
pub use error::{Error, Result};
