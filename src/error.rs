/****************************************************************
 * $ID: error.rs  	Thu 15 Oct 2026 10:12:40+0800               *
 *                                                              *
 * Maintainer: 范美辉 (MeiHui FAN) <mhfan@ustc.edu>              *
 * Copyright (c) 2026 M.H.Fan, All rights reserved.             *
 ****************************************************************/

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)] pub enum Error {
    #[error("I/O error: {0}")] Io(#[from] std::io::Error),
    #[error("JSON error: {0}")] Json(#[from] serde_json::Error),
    #[error("image encoding error: {0}")] Image(#[from] image::ImageError),

    #[error("malformed IDX file {name}: {reason}")] Idx { name: String, reason: String },

    #[error("table row has {got} cells, expected {expected} columns")]
    TableShape { expected: usize, got: usize },
    #[error("image has {got} pixels, expected {width}x{height}")]
    ImageShape { width: u32, height: u32, got: usize },

    #[error("tracker run has already finished")] Finished,
    #[error("invalid configuration: {0}")] Config(String),
    /// Failures reported by burn's config/record layers.
    #[error("burn: {0}")] Burn(String),
}
