//! Input validation shared by registries and the service layer.

use crate::error::ValidationError;
use crate::permission::Permission;

/// Trim a name and reject it if nothing is left.
///
/// `field` names the offending input in the error message.
pub fn validate_name<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::BlankName { field });
    }
    Ok(trimmed)
}

/// Reject empty masks.
pub fn validate_mask(mask: Permission) -> Result<Permission, ValidationError> {
    if mask.is_empty() {
        return Err(ValidationError::NonPositiveMask(0));
    }
    Ok(mask)
}

/// The resolver answers for exactly one bit at a time.
pub fn validate_single_bit(bit: Permission) -> Result<Permission, ValidationError> {
    if !bit.is_single_bit() {
        return Err(ValidationError::NotSingleBit(bit.bits()));
    }
    Ok(bit)
}

/// Explicit ace orders come from administrators and may be out of range.
pub fn validate_ace_order(order: i64) -> Result<u32, ValidationError> {
    if order < 0 {
        return Err(ValidationError::NegativeAceOrder(order));
    }
    u32::try_from(order).map_err(|_| {
        ValidationError::InvalidConfig(format!("ace order {order} exceeds u32 range"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_trims() {
        assert_eq!(validate_name("  EDITOR ", "role name"), Ok("EDITOR"));
    }

    #[test]
    fn test_validate_name_rejects_blank() {
        assert_eq!(
            validate_name(" \t", "sid"),
            Err(ValidationError::BlankName { field: "sid" })
        );
    }

    #[test]
    fn test_validate_mask() {
        assert!(validate_mask(Permission::NONE).is_err());
        assert_eq!(validate_mask(Permission::READ), Ok(Permission::READ));
    }

    #[test]
    fn test_validate_single_bit() {
        assert!(validate_single_bit(Permission::WRITE).is_ok());
        assert_eq!(
            validate_single_bit(Permission::READ | Permission::WRITE),
            Err(ValidationError::NotSingleBit(3))
        );
        assert!(validate_single_bit(Permission::NONE).is_err());
    }

    #[test]
    fn test_validate_ace_order() {
        assert_eq!(validate_ace_order(0), Ok(0));
        assert_eq!(validate_ace_order(5), Ok(5));
        assert_eq!(
            validate_ace_order(-1),
            Err(ValidationError::NegativeAceOrder(-1))
        );
    }
}
