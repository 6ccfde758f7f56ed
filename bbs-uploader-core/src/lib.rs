#![doc = "bbs-uploader-core: settings, file sources and session orchestration for BizBuySell batch uploads."]

//! Everything here is independent of a concrete browser or cloud SDK. The binary crate
//! plugs in WebDriver, S3 and Lambda through the traits in [`contract`].
//!
//! # Usage
//! Resolve [`config::Settings`], build a [`driver::Driver`] with a launcher and a file
//! fetcher, then call `run`, `handle_s3_trigger` or `rotate_ip`.

pub mod config;
pub mod contract;
pub mod credentials;
pub mod download;
pub mod driver;
pub mod error;
pub mod net;
pub mod session;
pub mod wait;
