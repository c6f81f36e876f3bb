// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per-tenant object storage.
//!
//! Every tenant gets a bucket, a storage user, and a policy granting that
//! user access to the bucket and nothing else.

use std::fmt;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{Tag, Tagging};
use aws_types::region::Region;
use tracing::{debug, instrument, trace};

/// The storage quota of every tenant bucket.
pub const BUCKET_QUOTA_BYTES: u64 = 1 << 30;

/// The bucket tag recording a bucket's quota.
pub const QUOTA_TAG: &str = "hearth.dev/quota-bytes";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{operation} failed: {message} ({code})")]
    Api {
        operation: &'static str,
        code: String,
        message: String,
    },
    #[error("invalid request: {0}")]
    Build(#[from] aws_sdk_s3::error::BuildError),
}

impl StorageError {
    fn from_sdk<E, R>(operation: &'static str, err: SdkError<E, R>) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: fmt::Debug,
    {
        StorageError::Api {
            operation,
            code: err.code().unwrap_or("Unknown").to_owned(),
            message: err
                .message()
                .map(str::to_owned)
                .unwrap_or_else(|| err.to_string()),
        }
    }
}

/// Manages tenant buckets, users, and policies.
#[async_trait]
pub trait ObjectStorage: fmt::Debug + Send + Sync {
    /// Creates `bucket` with the tenant quota.
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    /// Empties and deletes `bucket`.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError>;

    async fn create_user(&self, user: &str) -> Result<(), StorageError>;

    async fn delete_user(&self, user: &str) -> Result<(), StorageError>;

    /// Creates `policy`, granting access to `bucket`, and attaches it to
    /// `user`.
    async fn attach_bucket_policy(
        &self,
        policy: &str,
        user: &str,
        bucket: &str,
    ) -> Result<(), StorageError>;

    /// Detaches `policy` from `user` and deletes it.
    async fn delete_bucket_policy(&self, policy: &str, user: &str) -> Result<(), StorageError>;
}

/// Returns the policy document granting full access to `bucket` and its
/// objects.
pub fn bucket_policy_document(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": ["s3:*"],
            "Resource": [
                format!("arn:aws:s3:::{bucket}"),
                format!("arn:aws:s3:::{bucket}/*"),
            ],
        }],
    })
    .to_string()
}

/// Connection settings for [`S3IamStorage`].
#[derive(Clone, Default)]
pub struct S3IamStorageConfig {
    pub region: Option<String>,
    /// Overrides the S3 endpoint, for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Overrides the IAM endpoint.
    pub iam_endpoint: Option<String>,
    pub credentials: Option<(String, String)>,
}

impl fmt::Debug for S3IamStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("S3IamStorageConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("iam_endpoint", &self.iam_endpoint)
            .finish_non_exhaustive()
    }
}

/// Long-lived credentials of the provisioner's own storage account.
fn static_credentials(access_key_id: String, secret_access_key: String) -> Credentials {
    Credentials::new(
        access_key_id,
        secret_access_key,
        None,
        None,
        "hearth-provisioner",
    )
}

/// An [`ObjectStorage`] backed by S3 buckets and IAM users.
#[derive(Debug, Clone)]
pub struct S3IamStorage {
    s3: aws_sdk_s3::Client,
    iam: aws_sdk_iam::Client,
}

impl S3IamStorage {
    pub async fn new(config: S3IamStorageConfig) -> S3IamStorage {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = config.region {
            loader = loader.region(Region::new(region));
        }
        if let Some((access_key_id, secret_access_key)) = config.credentials {
            loader = loader
                .credentials_provider(static_credentials(access_key_id, secret_access_key));
        }
        let sdk_config = loader.load().await;

        let mut s3 = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = config.endpoint {
            // S3-compatible stores rarely support virtual-hosted buckets.
            s3 = s3.endpoint_url(endpoint).force_path_style(true);
        }
        let mut iam = aws_sdk_iam::config::Builder::from(&sdk_config);
        if let Some(endpoint) = config.iam_endpoint {
            iam = iam.endpoint_url(endpoint);
        }
        S3IamStorage {
            s3: aws_sdk_s3::Client::from_conf(s3.build()),
            iam: aws_sdk_iam::Client::from_conf(iam.build()),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3IamStorage {
    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        self.s3
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("CreateBucket", e))?;
        let tagging = Tagging::builder()
            .tag_set(
                Tag::builder()
                    .key(QUOTA_TAG)
                    .value(BUCKET_QUOTA_BYTES.to_string())
                    .build()?,
            )
            .build()?;
        self.s3
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("PutBucketTagging", e))?;
        debug!("created bucket");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let mut continuation_token = None;
        loop {
            let resp = self
                .s3
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .map_err(|e| StorageError::from_sdk("ListObjectsV2", e))?;
            for key in resp.contents().iter().filter_map(|o| o.key()) {
                trace!(key, "deleting object");
                self.s3
                    .delete_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| StorageError::from_sdk("DeleteObject", e))?;
            }
            match resp.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
        self.s3
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("DeleteBucket", e))?;
        debug!("deleted bucket");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_user(&self, user: &str) -> Result<(), StorageError> {
        self.iam
            .create_user()
            .user_name(user)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("CreateUser", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, user: &str) -> Result<(), StorageError> {
        self.iam
            .delete_user()
            .user_name(user)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("DeleteUser", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn attach_bucket_policy(
        &self,
        policy: &str,
        user: &str,
        bucket: &str,
    ) -> Result<(), StorageError> {
        self.iam
            .put_user_policy()
            .user_name(user)
            .policy_name(policy)
            .policy_document(bucket_policy_document(bucket))
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("PutUserPolicy", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_bucket_policy(&self, policy: &str, user: &str) -> Result<(), StorageError> {
        self.iam
            .delete_user_policy()
            .user_name(user)
            .policy_name(policy)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("DeleteUserPolicy", e))?;
        Ok(())
    }
}
