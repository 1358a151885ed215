#![allow(async_fn_in_trait)]
pub mod catalog;
pub mod config;
pub mod dates;
pub mod download;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod layout;
pub mod metadata;
pub mod output;
pub mod project;
pub mod reference;
pub mod s3;
pub mod satellites;
pub mod site;
