//! 语言代码映射

/// 两位语言代码到 tesseract 语言包名称的映射；未知代码和 `auto` 使用 `eng`
pub fn ocr_language(code: &str) -> &'static str {
    match code.trim().to_ascii_lowercase().as_str() {
        "en" | "auto" => "eng",
        "tr" => "tur",
        "de" => "deu",
        "fr" => "fra",
        "es" => "spa",
        "it" => "ita",
        "pt" => "por",
        "ru" => "rus",
        "ja" => "jpn",
        "zh" => "chi_sim",
        "ko" => "kor",
        "ar" => "ara",
        "hi" => "hin",
        _ => "eng",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes() {
        assert_eq!(ocr_language("tr"), "tur");
        assert_eq!(ocr_language("ZH"), "chi_sim");
        assert_eq!(ocr_language("auto"), "eng");
    }

    #[test]
    fn unknown_codes_fall_back_to_english() {
        assert_eq!(ocr_language("xx"), "eng");
        assert_eq!(ocr_language(""), "eng");
    }
}
