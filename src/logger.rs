/****************************************************************
 * $ID: logger.rs  	Fri 16 Oct 2026 10:05:33+0800               *
 *                                                              *
 * Maintainer: 范美辉 (MeiHui FAN) <mhfan@ustc.edu>              *
 * Copyright (c) 2026 M.H.Fan, All rights reserved.             *
 ****************************************************************/

use std::io::Write;

/// `<local time> - <message>` lines at INFO level, `RUST_LOG` overrides the filter.
/// Does nothing if a global logger is already installed.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        // The wgpu crates are logging too much, keep their warnings only.
        .filter_module("wgpu_core", log::LevelFilter::Warn)
        .filter_module("wgpu_hal",  log::LevelFilter::Warn)
        .format(|buf, record| writeln!(buf, "{} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"), record.args()))
        .try_init();
}
