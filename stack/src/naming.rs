//! Deterministic physical names and ARNs.
//!
//! Every generated identifier is a pure function of the stack name and the
//! resource's logical id, never of declaration order. That is what makes two
//! builders that declare the same resources in different orders produce the
//! same graph.

use sha2::{Digest, Sha256};

/// Upper-case hex digest of `stack/logical_id`, truncated to `len` characters.
pub fn hash_suffix(stack: &str, logical_id: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stack.as_bytes());
    hasher.update(b"/");
    hasher.update(logical_id.as_bytes());
    let digest = hex::encode_upper(hasher.finalize());
    digest[..len.min(digest.len())].to_string()
}

/// `<stack>-<logicalId>-<HASH>`, the default physical name.
pub fn physical_name(stack: &str, logical_id: &str) -> String {
    format!("{}-{}-{}", stack, logical_id, hash_suffix(stack, logical_id, 12))
}

/// Lower-case physical name for services that reject upper case (buckets).
pub fn lowercase_name(stack: &str, logical_id: &str) -> String {
    physical_name(stack, logical_id)
        .to_ascii_lowercase()
        .replace('_', "-")
}

/// Role names are capped at 64 characters.
pub fn role_name(stack: &str, logical_id: &str) -> String {
    let suffix = hash_suffix(stack, logical_id, 12);
    let mut base = format!("{}-{}", stack, logical_id);
    base.truncate(64 - suffix.len() - 1);
    format!("{}-{}", base, suffix)
}

pub fn table_arn(region: &str, account: &str, name: &str) -> String {
    format!("arn:aws:dynamodb:{}:{}:table/{}", region, account, name)
}

pub fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{}", name)
}

pub fn function_arn(region: &str, account: &str, name: &str) -> String {
    format!("arn:aws:lambda:{}:{}:function:{}", region, account, name)
}

pub fn role_arn(account: &str, name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account, name)
}

/// `<region>_<9 chars>`, the shape of a user pool id.
pub fn user_pool_id(region: &str, stack: &str, logical_id: &str) -> String {
    let suffix = hash_suffix(stack, logical_id, 9);
    let mixed: String = suffix
        .chars()
        .enumerate()
        .map(|(i, c)| if i % 2 == 0 { c } else { c.to_ascii_lowercase() })
        .collect();
    format!("{}_{}", region, mixed)
}

pub fn user_pool_arn(region: &str, account: &str, pool_id: &str) -> String {
    format!("arn:aws:cognito-idp:{}:{}:userpool/{}", region, account, pool_id)
}

/// Issuer/provider name of a user pool, as identity pools and authorizers
/// refer to it.
pub fn user_pool_provider_name(region: &str, pool_id: &str) -> String {
    format!("cognito-idp.{}.amazonaws.com/{}", region, pool_id)
}

/// 26 lower-case characters, the shape of an app client id.
pub fn client_id(stack: &str, logical_id: &str) -> String {
    hash_suffix(stack, logical_id, 26).to_ascii_lowercase()
}

/// `<region>:<uuid>`, the shape of an identity pool id.
pub fn identity_pool_id(region: &str, stack: &str, logical_id: &str) -> String {
    let h = hash_suffix(stack, logical_id, 32).to_ascii_lowercase();
    format!(
        "{}:{}-{}-{}-{}-{}",
        region,
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

pub fn identity_pool_arn(region: &str, account: &str, pool_id: &str) -> String {
    format!(
        "arn:aws:cognito-identity:{}:{}:identitypool/{}",
        region, account, pool_id
    )
}

/// Ten lower-case characters, the shape of REST API and authorizer ids.
pub fn short_id(stack: &str, logical_id: &str) -> String {
    hash_suffix(stack, logical_id, 10).to_ascii_lowercase()
}

pub fn rest_api_arn(region: &str, api_id: &str) -> String {
    format!("arn:aws:apigateway:{}::/restapis/{}", region, api_id)
}

pub fn authorizer_arn(region: &str, authorizer_id: &str) -> String {
    format!("arn:aws:apigateway:{}::/authorizers/{}", region, authorizer_id)
}

pub fn method_arn(region: &str, account: &str, api_id: &str, method: &str, path: &str) -> String {
    format!(
        "arn:aws:execute-api:{}:{}:{}/*/{}{}",
        region, account, api_id, method, path
    )
}

/// `https://<prefix>.auth.<region>.amazoncognito.com`
pub fn hosted_domain_url(prefix: &str, region: &str) -> String {
    format!("https://{}.auth.{}.amazoncognito.com", prefix, region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_suffix_is_stable() {
        let a = hash_suffix("Stack", "myDynamoDb_table", 12);
        let b = hash_suffix("Stack", "myDynamoDb_table", 12);
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, hash_suffix("Stack", "myLambda_function", 12));
        assert_ne!(a, hash_suffix("Other", "myDynamoDb_table", 12));
    }

    #[test]
    fn test_physical_name_shape() {
        let name = physical_name("Stack", "myDynamoDb_table");
        assert!(name.starts_with("Stack-myDynamoDb_table-"));
    }

    #[test]
    fn test_lowercase_name_is_bucket_safe() {
        let name = lowercase_name("Stack", "MyBucketTest");
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn test_role_name_is_capped() {
        let name = role_name(
            "AVeryLongStackNameThatKeepsGoing",
            "myAuthenticatedRole_RestApi_WithAnEvenLongerSuffix",
        );
        assert!(name.len() <= 64);
    }

    #[test]
    fn test_identity_pool_id_shape() {
        let id = identity_pool_id("us-east-1", "Stack", "MyCognito_IdentityPool");
        let (region, uuid) = id.split_once(':').unwrap();
        assert_eq!(region, "us-east-1");
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.matches('-').count(), 4);
    }

    #[test]
    fn test_user_pool_provider_name() {
        let pool_id = user_pool_id("us-east-1", "Stack", "pool");
        assert!(pool_id.starts_with("us-east-1_"));
        assert_eq!(
            user_pool_provider_name("us-east-1", &pool_id),
            format!("cognito-idp.us-east-1.amazonaws.com/{}", pool_id)
        );
    }

    #[test]
    fn test_table_arn() {
        assert_eq!(
            table_arn("us-east-1", "123456789012", "items"),
            "arn:aws:dynamodb:us-east-1:123456789012:table/items"
        );
    }
}
