pub mod archive;
pub mod file_processor;
pub mod file_set_repository;
pub mod storage;
pub mod thumbnail_service;
pub mod worker;
