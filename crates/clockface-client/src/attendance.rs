//! Attendance routes: face verification, check-in/out, capture upload and
//! the face-recognition setting.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use clockface_core::{
    AttendanceNotifier, CapturedImage, EmployeeId, SettingsSource, TransportError, Verifier,
    VerifyOutcome,
};
use serde::{Deserialize, Serialize};

use crate::rpc::RpcClient;

pub const VERIFY_ROUTE: &str = "/hr_attendance/verify_employee_face";
pub const CHECK_IN_OUT_ROUTE: &str = "/hr_attendance/systray_check_in_out";
pub const CAPTURE_IMAGE_ROUTE: &str = "/get_checkin_image";
pub const SETTINGS_ROUTE: &str = "/attendance/face_recognition_setting";

/// Still image as sent to the server: base64 JPEG without a data-URL prefix.
#[derive(Debug, Serialize)]
pub struct ImageParams {
    pub employee_id: EmployeeId,
    pub image_data: String,
    pub checkout: bool,
}

impl ImageParams {
    pub fn new(employee_id: EmployeeId, image: &CapturedImage, checkout: bool) -> Self {
        Self {
            employee_id,
            image_data: BASE64_STANDARD.encode(&image.jpeg),
            checkout,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyResult {
    pub matched: bool,
    /// Server-side reason for a non-match, e.g. "No face detected in image".
    #[serde(default)]
    pub error: Option<String>,
}

impl From<VerifyResult> for VerifyOutcome {
    fn from(r: VerifyResult) -> Self {
        if r.matched {
            VerifyOutcome::matched()
        } else {
            VerifyOutcome::not_matched(r.error)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckInOutParams {
    pub checkout: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckInOutResult {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct EmptyParams {}

#[derive(Debug, Deserialize)]
pub struct SettingResult {
    pub is_face_recognition: bool,
}

#[async_trait]
impl Verifier for RpcClient {
    async fn verify(
        &self,
        employee_id: EmployeeId,
        image: &CapturedImage,
        checkout: bool,
    ) -> Result<VerifyOutcome, TransportError> {
        let params = ImageParams::new(employee_id, image, checkout);
        let result: VerifyResult = self.call(VERIFY_ROUTE, &params).await?;
        tracing::debug!(
            employee = %employee_id,
            matched = result.matched,
            reason = result.error.as_deref().unwrap_or(""),
            "verify response"
        );
        Ok(result.into())
    }
}

#[async_trait]
impl AttendanceNotifier for RpcClient {
    async fn record_event(&self, checkout: bool) -> Result<(), TransportError> {
        let result: CheckInOutResult = self
            .call(CHECK_IN_OUT_ROUTE, &CheckInOutParams { checkout })
            .await?;
        if result.status != "success" {
            return Err(TransportError::Rejected(result.status));
        }
        Ok(())
    }

    async fn upload_capture_artifact(
        &self,
        employee_id: EmployeeId,
        image: &CapturedImage,
        checkout: bool,
    ) -> Result<(), TransportError> {
        let params = ImageParams::new(employee_id, image, checkout);
        let _: serde_json::Value = self.call(CAPTURE_IMAGE_ROUTE, &params).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsSource for RpcClient {
    async fn face_recognition_enabled(&self) -> Result<bool, TransportError> {
        let result: SettingResult = self.call(SETTINGS_ROUTE, &EmptyParams {}).await?;
        Ok(result.is_face_recognition)
    }
}
