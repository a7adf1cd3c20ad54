//! TOTP Enrollment and Verification

use qrcode::{render::svg, QrCode};
use totp_rs::{Algorithm, Secret, TOTP};

use super::error::AuthError;

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;

/// TOTP parameters shared by enrollment and verification.
#[derive(Debug, Clone)]
pub struct TwoFactor {
    issuer: String,
    skew: u8,
}

impl TwoFactor {
    pub fn new(issuer: impl Into<String>, skew: u8) -> Self {
        Self {
            issuer: issuer.into(),
            skew,
        }
    }

    /// Fresh 160-bit secret, base32-encoded.
    pub fn generate_secret() -> String {
        Secret::generate_secret().to_encoded().to_string()
    }

    fn totp(&self, secret: &str, account: &str) -> Result<TOTP, AuthError> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Internal(format!("Malformed TOTP secret: {e:?}")))?;

        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            self.skew,
            STEP_SECONDS,
            bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| AuthError::Internal(format!("Failed to create TOTP: {e}")))
    }

    /// `otpauth://` enrollment URI.
    pub fn otpauth_url(&self, secret: &str, account: &str) -> Result<String, AuthError> {
        Ok(self.totp(secret, account)?.get_url())
    }

    /// Enrollment URI rendered as an SVG QR code.
    pub fn qr_code_svg(&self, secret: &str, account: &str) -> Result<String, AuthError> {
        let url = self.otpauth_url(secret, account)?;
        let code = QrCode::new(url.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Failed to encode QR code: {e}")))?;

        Ok(code
            .render::<svg::Color>()
            .min_dimensions(200, 200)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build())
    }

    /// Check a 6-digit code against the current window (plus skew).
    pub fn verify(&self, secret: &str, account: &str, code: &str) -> Result<bool, AuthError> {
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }

        self.totp(secret, account)?
            .check_current(code)
            .map_err(|e| AuthError::Internal(format!("Failed to verify TOTP code: {e}")))
    }
}
