//! Webhook 签名校验
//!
//! 对原始请求体字节做 HMAC-SHA256 校验。必须使用提供商投递的原始字节，
//! 不能用反序列化后再序列化的 JSON——键序或空白差异会让合法签名失效，
//! 篡改过的报文反而可能构造出匹配的再序列化形式。
//!
//! 签名头格式: `t=<timestamp>,v1=<signature>`

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PaymentEventError;

type HmacSha256 = Hmac<Sha256>;

/// 校验签名头与原始报文
///
/// 被签名的内容为 `"{timestamp}.{payload}"`。比较使用常数时间算法，
/// 防止通过响应时延逐字节试探签名。任何解析失败都归结为同一个
/// `SignatureInvalid`，不向调用方泄露失败的具体环节。
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    signing_secret: &str,
) -> Result<(), PaymentEventError> {
    let parts: std::collections::HashMap<&str, &str> = signature_header
        .split(',')
        .filter_map(|part| {
            let mut kv = part.splitn(2, '=');
            Some((kv.next()?.trim(), kv.next()?))
        })
        .collect();

    let timestamp = parts.get("t").ok_or(PaymentEventError::SignatureInvalid)?;
    let signature = parts.get("v1").ok_or(PaymentEventError::SignatureInvalid)?;

    let payload_str =
        std::str::from_utf8(payload).map_err(|_| PaymentEventError::SignatureInvalid)?;
    let signed_payload = format!("{timestamp}.{payload_str}");

    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| PaymentEventError::SignatureInvalid)?;
    mac.update(signed_payload.as_bytes());

    let expected = hex::encode(mac.finalize().into_bytes());

    // 常数时间比较
    if subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into() {
        Ok(())
    } else {
        Err(PaymentEventError::SignatureInvalid)
    }
}

/// 为给定报文生成签名头（测试与本地联调用）
pub fn sign_payload(payload: &[u8], timestamp: &str, signing_secret: &str) -> String {
    let signed_payload = format!(
        "{timestamp}.{}",
        std::str::from_utf8(payload).expect("payload 应为 UTF-8")
    );
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC 接受任意长度密钥");
    mac.update(signed_payload.as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
