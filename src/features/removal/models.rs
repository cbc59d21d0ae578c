use serde::{Deserialize, Serialize};

/// 成功响应的下载头，文件名固定为 `snaperase_result.png`
pub const RESULT_DISPOSITION: &str = "attachment; filename=snaperase_result.png";

/// `/remove-bg` 查询参数
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RemoveBgQuery {
    /// 输出格式：`json` 返回 base64 数据 URL，其余取值（或缺省）返回 PNG 附件
    #[serde(default)]
    pub format: Option<String>,
}

/// 输出形态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Attachment,
}

impl RemoveBgQuery {
    pub fn output_format(&self) -> OutputFormat {
        match self.format.as_deref() {
            Some("json") => OutputFormat::Json,
            _ => OutputFormat::Attachment,
        }
    }
}

/// `format=json` 时的成功响应
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RemoveBgJsonResponse {
    #[schema(example = true)]
    pub success: bool,
    /// `data:image/png;base64,<...>`
    #[schema(example = "data:image/png;base64,iVBORw0KGgo=")]
    pub image: String,
}

/// multipart 请求体（仅用于 OpenAPI 文档）
#[derive(Debug, utoipa::ToSchema)]
#[allow(dead_code)]
pub struct RemoveBgUpload {
    /// 待处理图片（png / jpeg / webp）
    #[schema(value_type = String, format = Binary)]
    pub image: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_json_selects_json_output() {
        let q = |f: Option<&str>| RemoveBgQuery {
            format: f.map(str::to_string),
        };
        assert_eq!(q(Some("json")).output_format(), OutputFormat::Json);
        assert_eq!(q(Some("image")).output_format(), OutputFormat::Attachment);
        assert_eq!(q(Some("JSON")).output_format(), OutputFormat::Attachment);
        assert_eq!(q(None).output_format(), OutputFormat::Attachment);
    }
}
