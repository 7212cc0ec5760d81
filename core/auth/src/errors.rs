// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    // Session lifecycle
    #[error("no active session")]
    NoActiveSession,

    // Token lifecycle
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid: {0}")]
    TokenInvalid(String),

    // JWT / crypto
    #[error("JWT error: {0}")]
    JwtLibraryError(#[from] jsonwebtoken_aws_lc::errors::Error),
}
