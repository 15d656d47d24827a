pub mod name_validator;
pub mod storage_directory;
