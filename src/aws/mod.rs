// Thin S3 wrapper used by the broker for gated bucket operations

pub mod s3;
pub mod sigv4;

pub use s3::{
    BucketProvider, CreateBucketInput, CreateBucketOutput, EncryptionType, ProviderError, S3Provider,
    bucket_name_violations, validate_bucket_name,
};
