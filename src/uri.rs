use crate::error::{Result, S3FetchError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub prefix: String,
}

impl S3Uri {
    pub fn parse(uri: &str) -> Result<Self> {
        // Check for s3:// prefix
        let Some(without_scheme) = uri.strip_prefix("s3://") else {
            return Err(S3FetchError::InvalidUri(format!(
                "URI must start with s3:// (got '{}')",
                uri
            )));
        };

        // The bucket always ends at the first '/', whatever the key delimiter is
        let (bucket, prefix) = match without_scheme.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (without_scheme, ""),
        };

        if bucket.trim().is_empty() {
            return Err(S3FetchError::InvalidUri("Bucket name is missing".to_string()));
        }

        Ok(S3Uri {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }
}

impl std::fmt::Display for S3Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_with_prefix() {
        let uri = S3Uri::parse("s3://testbucket/files").unwrap();
        assert_eq!(uri.bucket, "testbucket");
        assert_eq!(uri.prefix, "files");
    }

    #[test]
    fn test_uri_keeps_trailing_delimiter() {
        let uri = S3Uri::parse("s3://testbucket/files/").unwrap();
        assert_eq!(uri.bucket, "testbucket");
        assert_eq!(uri.prefix, "files/");
    }

    #[test]
    fn test_uri_without_prefix() {
        let uri = S3Uri::parse("s3://testbucket").unwrap();
        assert_eq!(uri.bucket, "testbucket");
        assert_eq!(uri.prefix, "");

        let uri = S3Uri::parse("s3://testbucket/").unwrap();
        assert_eq!(uri.bucket, "testbucket");
        assert_eq!(uri.prefix, "");
    }

    #[test]
    fn test_uri_with_nested_prefix() {
        let uri = S3Uri::parse("s3://my-bucket/my/birthday-photos/2020-01-01").unwrap();
        assert_eq!(uri.bucket, "my-bucket");
        assert_eq!(uri.prefix, "my/birthday-photos/2020-01-01");
        assert_eq!(uri.to_string(), "s3://my-bucket/my/birthday-photos/2020-01-01");
    }

    #[test]
    fn test_invalid_uri_no_scheme() {
        let result = S3Uri::parse("my-bucket/key");
        assert!(matches!(result, Err(S3FetchError::InvalidUri(_))));
    }

    #[test]
    fn test_invalid_uri_no_bucket() {
        assert!(S3Uri::parse("s3://").is_err());
        assert!(S3Uri::parse("s3:///prefix").is_err());
    }
}
