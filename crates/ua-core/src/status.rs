//! OPC-UA status codes returned by the graph store, data sources and methods

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A non-Good OPC-UA status code. Success is expressed as `Ok(..)`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    #[error("Bad")]
    Bad,
    #[error("BadInternalError")]
    BadInternalError,
    #[error("BadOutOfMemory")]
    BadOutOfMemory,
    #[error("BadCommunicationError")]
    BadCommunicationError,
    #[error("BadTimeout")]
    BadTimeout,
    #[error("BadDataTypeIdUnknown")]
    BadDataTypeIdUnknown,
    #[error("BadUserAccessDenied")]
    BadUserAccessDenied,
    #[error("BadNodeIdUnknown")]
    BadNodeIdUnknown,
    #[error("BadNotReadable")]
    BadNotReadable,
    #[error("BadNotWritable")]
    BadNotWritable,
    #[error("BadOutOfRange")]
    BadOutOfRange,
    #[error("BadNotSupported")]
    BadNotSupported,
    #[error("BadNotFound")]
    BadNotFound,
    #[error("BadReferenceTypeIdInvalid")]
    BadReferenceTypeIdInvalid,
    #[error("BadParentNodeIdInvalid")]
    BadParentNodeIdInvalid,
    #[error("BadNodeIdExists")]
    BadNodeIdExists,
    #[error("BadNodeClassInvalid")]
    BadNodeClassInvalid,
    #[error("BadBrowseNameDuplicated")]
    BadBrowseNameDuplicated,
    #[error("BadTypeDefinitionInvalid")]
    BadTypeDefinitionInvalid,
    #[error("BadWriteNotSupported")]
    BadWriteNotSupported,
    #[error("BadTypeMismatch")]
    BadTypeMismatch,
    #[error("BadMethodInvalid")]
    BadMethodInvalid,
    #[error("BadArgumentsMissing")]
    BadArgumentsMissing,
    #[error("BadInvalidArgument")]
    BadInvalidArgument,
    #[error("BadInvalidState")]
    BadInvalidState,
    #[error("BadTooManyArguments")]
    BadTooManyArguments,
    #[error("BadEventNotAcknowledgeable")]
    BadEventNotAcknowledgeable,
    #[error("BadShutdown")]
    BadShutdown,
}

impl StatusCode {
    /// Numeric OPC-UA status value
    pub fn code(&self) -> u32 {
        match self {
            StatusCode::Bad => 0x8000_0000,
            StatusCode::BadInternalError => 0x8002_0000,
            StatusCode::BadOutOfMemory => 0x8003_0000,
            StatusCode::BadCommunicationError => 0x8005_0000,
            StatusCode::BadTimeout => 0x800A_0000,
            StatusCode::BadShutdown => 0x800C_0000,
            StatusCode::BadDataTypeIdUnknown => 0x8011_0000,
            StatusCode::BadUserAccessDenied => 0x801F_0000,
            StatusCode::BadNodeIdUnknown => 0x8034_0000,
            StatusCode::BadNotReadable => 0x803A_0000,
            StatusCode::BadNotWritable => 0x803B_0000,
            StatusCode::BadOutOfRange => 0x803C_0000,
            StatusCode::BadNotSupported => 0x803D_0000,
            StatusCode::BadNotFound => 0x803E_0000,
            StatusCode::BadReferenceTypeIdInvalid => 0x804C_0000,
            StatusCode::BadParentNodeIdInvalid => 0x805B_0000,
            StatusCode::BadNodeIdExists => 0x805E_0000,
            StatusCode::BadNodeClassInvalid => 0x805F_0000,
            StatusCode::BadBrowseNameDuplicated => 0x8061_0000,
            StatusCode::BadTypeDefinitionInvalid => 0x8063_0000,
            StatusCode::BadWriteNotSupported => 0x8073_0000,
            StatusCode::BadTypeMismatch => 0x8074_0000,
            StatusCode::BadMethodInvalid => 0x8075_0000,
            StatusCode::BadArgumentsMissing => 0x8076_0000,
            StatusCode::BadInvalidArgument => 0x80AB_0000,
            StatusCode::BadInvalidState => 0x80AF_0000,
            StatusCode::BadEventNotAcknowledgeable => 0x80BB_0000,
            StatusCode::BadTooManyArguments => 0x80E5_0000,
        }
    }

    pub fn name(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names_match_opcua() {
        assert_eq!(StatusCode::BadNodeIdExists.to_string(), "BadNodeIdExists");
        assert_eq!(StatusCode::BadNodeIdExists.code(), 0x805E_0000);
        assert_eq!(StatusCode::BadOutOfRange.code(), 0x803C_0000);
    }
}
