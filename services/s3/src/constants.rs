// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;

// Headers used by s3.
pub const X_AMZ_CONTENT_SHA_256: &str = "x-amz-content-sha256";
pub const X_AMZ_DATE: &str = "x-amz-date";
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";
pub const X_AMZ_REQUEST_PAYER: &str = "x-amz-request-payer";
pub const X_AMZ_COPY_SOURCE: &str = "x-amz-copy-source";
pub const X_AMZ_METADATA_DIRECTIVE: &str = "x-amz-metadata-directive";
pub const X_AMZ_STORAGE_CLASS: &str = "x-amz-storage-class";
pub const X_AWS_EC2_METADATA_TOKEN: &str = "x-aws-ec2-metadata-token";
pub const X_AWS_EC2_METADATA_TOKEN_TTL_SECONDS: &str = "x-aws-ec2-metadata-token-ttl-seconds";

pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
pub const EMPTY_STRING_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

// Configuration keys shared by the options layer and the environment.
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const AWS_NO_SIGN_REQUEST: &str = "AWS_NO_SIGN_REQUEST";
pub const AWS_PROFILE: &str = "AWS_PROFILE";
pub const AWS_DEFAULT_PROFILE: &str = "AWS_DEFAULT_PROFILE";
pub const AWS_CONFIG_FILE: &str = "AWS_CONFIG_FILE";
pub const AWS_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
pub const AWS_S3_ENDPOINT: &str = "AWS_S3_ENDPOINT";
pub const AWS_HTTPS: &str = "AWS_HTTPS";
pub const AWS_VIRTUAL_HOSTING: &str = "AWS_VIRTUAL_HOSTING";
pub const AWS_REQUEST_PAYER: &str = "AWS_REQUEST_PAYER";
pub const AWS_ROLE_ARN: &str = "AWS_ROLE_ARN";
pub const AWS_ROLE_SESSION_NAME: &str = "AWS_ROLE_SESSION_NAME";
pub const AWS_WEB_IDENTITY_TOKEN_FILE: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";
pub const AWS_STS_ENDPOINT: &str = "AWS_STS_ENDPOINT";
pub const AWS_STS_REGIONAL_ENDPOINTS: &str = "AWS_STS_REGIONAL_ENDPOINTS";
pub const AWS_EC2_METADATA_DISABLED: &str = "AWS_EC2_METADATA_DISABLED";
pub const AWS_EC2_METADATA_SERVICE_ENDPOINT: &str = "AWS_EC2_METADATA_SERVICE_ENDPOINT";

pub const S3VFS_TIMESTAMP: &str = "S3VFS_TIMESTAMP";
pub const S3VFS_CHUNK_SIZE: &str = "S3VFS_CHUNK_SIZE";
pub const S3VFS_CHUNK_SIZE_BYTES: &str = "S3VFS_CHUNK_SIZE_BYTES";
pub const S3VFS_READ_CHUNK_SIZE: &str = "S3VFS_READ_CHUNK_SIZE";
pub const S3VFS_MAX_RETRY: &str = "S3VFS_MAX_RETRY";
pub const S3VFS_RETRY_DELAY: &str = "S3VFS_RETRY_DELAY";
pub const S3VFS_RETRY_BACKOFF: &str = "S3VFS_RETRY_BACKOFF";
pub const S3VFS_NON_CACHED: &str = "S3VFS_NON_CACHED";
pub const S3VFS_IGNORE_STORAGE_CLASSES: &str = "S3VFS_IGNORE_STORAGE_CLASSES";
pub const S3VFS_UNLINK_BATCH_SIZE: &str = "S3VFS_UNLINK_BATCH_SIZE";
pub const S3VFS_DISABLE_READDIR_ON_OPEN: &str = "S3VFS_DISABLE_READDIR_ON_OPEN";
pub const S3VFS_USE_TEMP_FILE_FOR_RANDOM_WRITE: &str = "S3VFS_USE_TEMP_FILE_FOR_RANDOM_WRITE";
pub const S3VFS_SYNC_THREADS: &str = "S3VFS_SYNC_THREADS";

// Defaults.
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";
pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.amazonaws.com";
pub const DEFAULT_EC2_METADATA_ENDPOINT: &str = "http://169.254.169.254";
pub const DEFAULT_CHUNK_SIZE_MB: usize = 50;
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16384;
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 30.0;
pub const DEFAULT_IGNORE_STORAGE_CLASSES: &str = "GLACIER,DEEP_ARCHIVE";
pub const DEFAULT_UNLINK_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SYNC_THREADS: usize = 4;
pub const DEFAULT_SIGNED_URL_EXPIRES_SECS: u64 = 3600;
pub const STAT_DIR_PROBE_MAX_KEYS: usize = 100;

// S3 xml namespace used in request bodies.
pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// AsciiSet for [AWS UriEncode](https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-header-based-auth.html)
///
/// - URI encode every byte except the unreserved characters: 'A'-'Z', 'a'-'z', '0'-'9', '-', '.', '_', and '~'.
pub static AWS_URI_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// AsciiSet for [AWS UriEncode](https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-header-based-auth.html)
///
/// But used in query.
pub static AWS_QUERY_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
