//! Minstrel core: real-time mixing engine and DSP
//!
//! Everything platform-agnostic lives under [`domain`]. Device backends,
//! live capture and the visualization timer live in `minstrel-infra`.

pub mod domain;
