pub mod ci;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod excludes;
pub mod gather;
pub mod git;
pub mod merge;
pub mod model;
pub mod parsers;
pub mod paths;
pub mod props;
pub mod report;
pub mod tools;
pub mod upload;
