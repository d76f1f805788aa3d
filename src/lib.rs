/****************************************************************
 * $ID: lib.rs  	Tue 21 Nov 2023 15:25:27+0800               *
 *                                                              *
 * Maintainer: 范美辉 (MeiHui FAN) <mhfan@ustc.edu>              *
 * Copyright (c) 2023 M.H.Fan, All rights reserved.             *
 ****************************************************************/

pub mod error;
pub mod logger;
pub mod dataset;
pub mod tracker;
pub mod mnist;
pub mod sweep;

pub use error::{Error, Result};
