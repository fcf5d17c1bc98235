//! 地址验证模块
//!
//! EVM 地址格式校验与 EIP-55 Checksum

use sha3::{Digest, Keccak256};

/// 地址验证器
pub struct AddressValidator;

impl AddressValidator {
    /// 验证EVM地址（支持EIP-55 Checksum）
    ///
    /// 全小写/全大写地址不做 checksum 校验；混合大小写必须符合 EIP-55。
    pub fn validate_evm_address(address: &str) -> bool {
        // 1. 基本格式检查
        if !address.starts_with("0x") && !address.starts_with("0X") {
            return false;
        }

        if address.len() != 42 {
            return false;
        }

        // 2. 验证hex字符
        let hex_part = &address[2..];
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }

        // 3. EIP-55 Checksum验证（仅混合大小写时）
        let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
        if has_upper && has_lower {
            return Self::verify_eip55_checksum(address);
        }

        true
    }

    /// 验证EIP-55 Checksum
    /// https://eips.ethereum.org/EIPS/eip-55
    fn verify_eip55_checksum(address: &str) -> bool {
        Self::to_checksum(address)[2..] == address[2..]
    }

    /// 转换为 EIP-55 Checksum 格式
    ///
    /// 调用方需先保证是 0x + 40 位 hex。
    pub fn to_checksum(address: &str) -> String {
        let addr_lower = address[2..].to_lowercase();
        let hash = Keccak256::digest(addr_lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in addr_lower.chars().enumerate() {
            if ch.is_ascii_alphabetic() {
                let hash_byte = hash[i / 2];
                let hash_nibble = if i % 2 == 0 {
                    hash_byte >> 4
                } else {
                    hash_byte & 0x0f
                };
                if hash_nibble >= 8 {
                    out.push(ch.to_ascii_uppercase());
                    continue;
                }
            }
            out.push(ch);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_evm_address() {
        // 有效的EVM地址
        assert!(AddressValidator::validate_evm_address(
            "0x742d35cc6634c0532925a3b844bc9e7595f0beb0"
        ));
        assert!(AddressValidator::validate_evm_address(
            "0x9858EfFD232B4033E47d90003D23EC58E053e11f"
        ));

        // 无效的EVM地址
        assert!(!AddressValidator::validate_evm_address("742d35cc"));
        assert!(!AddressValidator::validate_evm_address("0xinvalid"));
        assert!(!AddressValidator::validate_evm_address(
            "0x9858effD232B4033E47d90003D23EC58E053e11f"
        ));
    }

    #[test]
    fn test_to_checksum() {
        assert_eq!(
            AddressValidator::to_checksum("0x9858effd232b4033e47d90003d23ec58e053e11f"),
            "0x9858EfFD232B4033E47d90003D23EC58E053e11f"
        );
    }
}
