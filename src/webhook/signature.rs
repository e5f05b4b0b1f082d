use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

pub const SIGNATURE_256_HEADER: &str = "x-hub-signature-256";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("缺少签名头")]
    Missing,

    #[error("签名格式无效")]
    Malformed,

    #[error("不支持的签名算法：{0}")]
    UnsupportedAlgorithm(String),

    #[error("签名不匹配")]
    Mismatch,
}

/// 校验请求体签名，优先使用 X-Hub-Signature-256，其次 X-Hub-Signature
pub fn verify(secret: &[u8], headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
    let header = headers
        .get(SIGNATURE_256_HEADER)
        .or_else(|| headers.get(SIGNATURE_HEADER))
        .ok_or(SignatureError::Missing)?;
    let value = header.to_str().map_err(|_| SignatureError::Malformed)?;
    verify_signature(secret, value.trim(), body)
}

/// `value` 形如 `sha256=<hex>`
pub fn verify_signature(secret: &[u8], value: &str, body: &[u8]) -> Result<(), SignatureError> {
    let (algorithm, hex_digest) = value.split_once('=').ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(hex_digest).map_err(|_| SignatureError::Malformed)?;

    match algorithm {
        "sha256" => check::<Hmac<Sha256>>(secret, body, &expected),
        "sha1" => check::<Hmac<Sha1>>(secret, body, &expected),
        "sha512" => check::<Hmac<Sha512>>(secret, body, &expected),
        other => Err(SignatureError::UnsupportedAlgorithm(other.to_owned())),
    }
}

// verify_slice 内部为常量时间比较
fn check<M: Mac + hmac::digest::KeyInit>(
    secret: &[u8],
    body: &[u8],
    expected: &[u8],
) -> Result<(), SignatureError> {
    let mut mac = <M as Mac>::new_from_slice(secret).map_err(|_| SignatureError::Malformed)?;
    mac.update(body);
    mac.verify_slice(expected).map_err(|_| SignatureError::Mismatch)
}

/// 计算 `sha256=<hex>` 形式的签名
#[cfg(test)]
pub fn sign_sha256(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC 接受任意长度的密钥");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
