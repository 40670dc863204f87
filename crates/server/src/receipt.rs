//! Printable service receipt: a tera template turned into PDF by wkhtmltopdf when it is
//! installed, or handed out as HTML otherwise.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{info, warn};

use taller_core::delivery::{DeliveryError, ReceiptRenderer, RenderedDocument, ServiceReceipt};

const RECEIPT_TEMPLATE: &str = "service_receipt.html.tera";

pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("money", tera_money_filter);
}

/// Formats an amount to 2 decimal places without leaving decimal arithmetic.
/// Decimals arrive serialized as strings. Usage: `amount | money`
fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let parsed = match value {
        tera::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        tera::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    };
    let amount = parsed
        .ok_or_else(|| tera::Error::msg(format!("money filter expects an amount, got {value}")))?;
    Ok(tera::Value::String(format!("{:.2}", amount.round_dp(2))))
}

#[derive(Clone, Debug)]
pub struct HtmlReceiptRenderer {
    tera: Tera,
    wkhtmltopdf_path: Option<String>,
}

impl HtmlReceiptRenderer {
    /// Loads templates from `template_dir`, e.g. `templates/receipts`.
    pub fn new(template_dir: &Path, pdf_enabled: bool) -> Result<Self, DeliveryError> {
        let pattern = format!("{}/**/*", template_dir.display());
        let mut tera = Tera::new(&pattern).map_err(|e| DeliveryError::Render(e.to_string()))?;
        if !tera.get_template_names().any(|name| name == RECEIPT_TEMPLATE) {
            return Err(DeliveryError::Render(format!(
                "{RECEIPT_TEMPLATE} not found under {}",
                template_dir.display()
            )));
        }
        register_template_filters(&mut tera);
        Ok(Self { tera, wkhtmltopdf_path: locate_wkhtmltopdf(pdf_enabled) })
    }

    /// Uses the template compiled into the binary.
    pub fn with_embedded_template(pdf_enabled: bool) -> Result<Self, DeliveryError> {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);
        tera.add_raw_template(
            RECEIPT_TEMPLATE,
            include_str!("../../../templates/receipts/service_receipt.html.tera"),
        )
        .map_err(|e| DeliveryError::Render(e.to_string()))?;
        Ok(Self { tera, wkhtmltopdf_path: locate_wkhtmltopdf(pdf_enabled) })
    }

    pub fn produces_pdf(&self) -> bool {
        self.wkhtmltopdf_path.is_some()
    }

    pub fn render_html(&self, receipt: &ServiceReceipt) -> Result<String, DeliveryError> {
        let mut context = Context::new();
        context.insert("receipt", receipt);
        self.tera.render(RECEIPT_TEMPLATE, &context).map_err(|e| DeliveryError::Render(e.to_string()))
    }

    async fn convert_html_to_pdf(
        &self,
        html: &str,
        wkhtmltopdf_path: &str,
    ) -> Result<Vec<u8>, DeliveryError> {
        let temp_dir = std::env::temp_dir();
        let stem = uuid::Uuid::new_v4();
        let html_path = temp_dir.join(format!("receipt_{stem}.html"));
        let pdf_path = temp_dir.join(format!("receipt_{stem}.pdf"));

        tokio::fs::write(&html_path, html).await.map_err(io_error)?;

        let output = Command::new(wkhtmltopdf_path)
            .arg("--page-size")
            .arg("A5")
            .arg("--encoding")
            .arg("utf-8")
            .arg("--quiet")
            .arg(&html_path)
            .arg(&pdf_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(io_error);
        let _ = tokio::fs::remove_file(&html_path).await;
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = tokio::fs::remove_file(&pdf_path).await;
            return Err(DeliveryError::Render(format!("wkhtmltopdf failed: {stderr}")));
        }

        let pdf_bytes = tokio::fs::read(&pdf_path).await.map_err(io_error)?;
        let _ = tokio::fs::remove_file(&pdf_path).await;
        Ok(pdf_bytes)
    }
}

fn locate_wkhtmltopdf(pdf_enabled: bool) -> Option<String> {
    if !pdf_enabled {
        return None;
    }
    let path = which::which("wkhtmltopdf").ok().map(|p| p.to_string_lossy().to_string());
    match &path {
        Some(path) => info!(path = %path, "wkhtmltopdf found"),
        None => warn!("wkhtmltopdf not found in PATH - receipts will be sent as HTML"),
    }
    path
}

fn io_error(error: std::io::Error) -> DeliveryError {
    DeliveryError::Render(error.to_string())
}

#[async_trait]
impl ReceiptRenderer for HtmlReceiptRenderer {
    async fn render_service_receipt(
        &self,
        receipt: &ServiceReceipt,
    ) -> Result<RenderedDocument, DeliveryError> {
        let html = self.render_html(receipt)?;

        if let Some(wkhtmltopdf) = &self.wkhtmltopdf_path {
            match self.convert_html_to_pdf(&html, wkhtmltopdf).await {
                Ok(bytes) => {
                    info!(
                        event_name = "receipts.pdf_rendered",
                        service = %receipt.number,
                        size = bytes.len(),
                        "service receipt rendered as pdf"
                    );
                    return Ok(RenderedDocument {
                        filename: format!("{}.pdf", receipt.number),
                        content_type: "application/pdf".to_owned(),
                        bytes,
                    });
                }
                Err(error) => {
                    warn!(error = %error, "PDF conversion failed, falling back to HTML");
                }
            }
        }

        Ok(RenderedDocument {
            filename: format!("{}.html", receipt.number),
            content_type: "text/html; charset=utf-8".to_owned(),
            bytes: html.into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use taller_core::delivery::{ReceiptRenderer, ServiceReceipt};

    use std::collections::HashMap;

    use super::{tera_money_filter, HtmlReceiptRenderer};

    fn receipt() -> ServiceReceipt {
        ServiceReceipt {
            number: "SRV25-00042".to_owned(),
            client_id: 3,
            equipment_id: 9,
            intake_type: "MOSTRADOR".to_owned(),
            problem_description: "no carga".to_owned(),
            is_warranty: true,
            original_service_id: Some(12),
            visit_fee: Some(Decimal::new(150_050, 2)),
            visit_fee_paid: false,
            received_on: NaiveDate::from_ymd_opt(2025, 3, 14).expect("date"),
            expected_return_on: None,
            intake_signature: None,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn embedded_template_renders_receipt_fields() {
        let renderer = HtmlReceiptRenderer::with_embedded_template(false).expect("renderer");

        let html = renderer.render_html(&receipt()).expect("html");

        assert!(html.contains("SRV25-00042"));
        assert!(html.contains("no carga"));
        assert!(html.contains("1500.50"));
        assert!(html.contains("servicio #12"));
        assert!(html.contains("pendiente"));
    }

    #[tokio::test]
    async fn html_is_returned_when_pdf_is_disabled() {
        let renderer = HtmlReceiptRenderer::with_embedded_template(false).expect("renderer");
        assert!(!renderer.produces_pdf());

        let document = renderer.render_service_receipt(&receipt()).await.expect("render");

        assert_eq!(document.filename, "SRV25-00042.html");
        assert_eq!(document.content_type, "text/html; charset=utf-8");
    }

    #[test]
    fn money_keeps_every_digit_of_large_amounts() {
        let args = HashMap::new();
        let format = |value: tera::Value| tera_money_filter(&value, &args);

        assert_eq!(
            format(tera::Value::String("19999999999999999.99".to_owned())).expect("large"),
            tera::Value::String("19999999999999999.99".to_owned())
        );
        assert_eq!(
            format(tera::Value::String("2.678".to_owned())).expect("rounded"),
            tera::Value::String("2.68".to_owned())
        );
        assert_eq!(
            format(tera::Value::from(7)).expect("integer"),
            tera::Value::String("7.00".to_owned())
        );
        assert!(format(tera::Value::String("gratis".to_owned())).is_err());
    }

    #[test]
    fn missing_template_directory_is_reported() {
        let missing = std::env::temp_dir().join(format!("taller-missing-{}", uuid::Uuid::new_v4()));

        assert!(HtmlReceiptRenderer::new(&missing, false).is_err());
    }
}
