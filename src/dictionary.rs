//! 离线词典
//!
//! 两个远程翻译服务都不可用时的最后一道降级：按语言对做整词替换。
//! 没有对应词典的语言对返回带标记的原文。

use std::collections::HashMap;

use regex::{Captures, Regex};

const EN_TR: &[(&str, &str)] = &[
    ("hello", "merhaba"),
    ("world", "dünya"),
    ("document", "belge"),
    ("translation", "çeviri"),
    ("page", "sayfa"),
    ("language", "dil"),
    ("content", "içerik"),
    ("section", "bölüm"),
    ("chapter", "bölüm"),
    ("table", "tablo"),
    ("figure", "şekil"),
    ("image", "resim"),
    ("text", "metin"),
    ("title", "başlık"),
    ("subtitle", "alt başlık"),
    ("paragraph", "paragraf"),
    ("introduction", "giriş"),
    ("conclusion", "sonuç"),
    ("appendix", "ek"),
    ("reference", "referans"),
    ("bibliography", "kaynakça"),
    ("glossary", "sözlük"),
    ("index", "dizin"),
    ("preface", "önsöz"),
    ("foreword", "önsöz"),
    ("abstract", "özet"),
    ("summary", "özet"),
    ("note", "not"),
    ("footnote", "dipnot"),
    ("header", "başlık"),
    ("footer", "altbilgi"),
    ("page number", "sayfa numarası"),
    ("list", "liste"),
    ("bullet point", "madde işareti"),
    ("numbering", "numaralandırma"),
    ("font", "yazı tipi"),
    ("size", "boyut"),
    ("color", "renk"),
    ("margin", "kenar boşluğu"),
    ("layout", "düzen"),
    ("style", "stil"),
    ("format", "biçim"),
    ("alignment", "hizalama"),
    ("left", "sol"),
    ("right", "sağ"),
    ("center", "merkez"),
    ("bold", "kalın"),
    ("italic", "italik"),
    ("caption", "alt yazı"),
    ("chart", "grafik"),
    ("graph", "grafik"),
    ("diagram", "diyagram"),
    ("flowchart", "akış şeması"),
    ("process", "süreç"),
    ("method", "yöntem"),
    ("theory", "teori"),
    ("concept", "kavram"),
    ("idea", "fikir"),
    ("analysis", "analiz"),
    ("review", "inceleme"),
    ("evaluation", "değerlendirme"),
    ("assessment", "değerlendirme"),
    ("result", "sonuç"),
    ("finding", "bulgu"),
    ("recommendation", "öneri"),
    ("suggestion", "öneri"),
    ("discussion", "tartışma"),
    ("argument", "argüman"),
    ("evidence", "kanıt"),
    ("data", "veri"),
    ("information", "bilgi"),
    ("knowledge", "bilgi"),
    ("good", "iyi"),
    ("morning", "sabah"),
    ("evening", "akşam"),
    ("night", "gece"),
    ("thanks", "teşekkürler"),
    ("please", "lütfen"),
    ("yes", "evet"),
    ("no", "hayır"),
    ("today", "bugün"),
    ("tomorrow", "yarın"),
    ("yesterday", "dün"),
];

const TR_EN: &[(&str, &str)] = &[
    ("merhaba", "hello"),
    ("dünya", "world"),
    ("belge", "document"),
    ("çeviri", "translation"),
    ("sayfa", "page"),
    ("dil", "language"),
    ("içerik", "content"),
    ("bölüm", "section"),
    ("tablo", "table"),
    ("şekil", "figure"),
    ("resim", "image"),
    ("metin", "text"),
    ("başlık", "title"),
    ("alt başlık", "subtitle"),
    ("paragraf", "paragraph"),
    ("giriş", "introduction"),
    ("sonuç", "conclusion"),
    ("ek", "appendix"),
    ("referans", "reference"),
    ("kaynakça", "bibliography"),
    ("sözlük", "glossary"),
    ("dizin", "index"),
    ("önsöz", "preface"),
    ("özet", "summary"),
    ("not", "note"),
    ("dipnot", "footnote"),
    ("altbilgi", "footer"),
    ("sayfa numarası", "page number"),
    ("liste", "list"),
    ("madde işareti", "bullet point"),
    ("numaralandırma", "numbering"),
    ("yazı tipi", "font"),
    ("boyut", "size"),
    ("renk", "color"),
    ("kenar boşluğu", "margin"),
    ("düzen", "layout"),
    ("stil", "style"),
    ("biçim", "format"),
    ("hizalama", "alignment"),
    ("sol", "left"),
    ("sağ", "right"),
    ("merkez", "center"),
    ("kalın", "bold"),
    ("italik", "italic"),
    ("alt yazı", "caption"),
    ("grafik", "chart"),
    ("diyagram", "diagram"),
    ("akış şeması", "flowchart"),
    ("süreç", "process"),
    ("yöntem", "method"),
    ("teori", "theory"),
    ("kavram", "concept"),
    ("fikir", "idea"),
    ("analiz", "analysis"),
    ("inceleme", "review"),
    ("değerlendirme", "evaluation"),
    ("bulgu", "finding"),
    ("öneri", "recommendation"),
    ("tartışma", "discussion"),
    ("argüman", "argument"),
    ("kanıt", "evidence"),
    ("veri", "data"),
    ("bilgi", "information"),
    ("iyi", "good"),
    ("sabah", "morning"),
    ("akşam", "evening"),
    ("gece", "night"),
    ("teşekkürler", "thanks"),
    ("lütfen", "please"),
    ("evet", "yes"),
    ("hayır", "no"),
    ("bugün", "today"),
    ("yarın", "tomorrow"),
    ("dün", "yesterday"),
];

/// 单个语言对的词典
struct PairDictionary {
    words: HashMap<String, &'static str>,
    pattern: Regex,
}

impl PairDictionary {
    fn build(entries: &'static [(&'static str, &'static str)]) -> Option<Self> {
        let words: HashMap<String, &'static str> = entries
            .iter()
            .map(|(from, to)| (from.to_lowercase(), *to))
            .collect();

        // 多词短语优先匹配
        let mut keys: Vec<&str> = entries.iter().map(|(from, _)| *from).collect();
        keys.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        let alternation = keys
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).ok()?;

        Some(Self { words, pattern })
    }

    fn apply(&self, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures| {
                let matched = &caps[0];
                self.words
                    .get(&matched.to_lowercase())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| matched.to_string())
            })
            .into_owned()
    }
}

/// 离线词典集合
pub struct OfflineDictionary {
    pairs: HashMap<(String, String), PairDictionary>,
}

impl OfflineDictionary {
    /// 内置的英语/土耳其语词典
    pub fn builtin() -> Self {
        let mut pairs = HashMap::new();
        if let Some(dict) = PairDictionary::build(EN_TR) {
            pairs.insert(("en".to_string(), "tr".to_string()), dict);
        }
        if let Some(dict) = PairDictionary::build(TR_EN) {
            pairs.insert(("tr".to_string(), "en".to_string()), dict);
        }
        Self { pairs }
    }

    pub fn supports(&self, source_lang: &str, target_lang: &str) -> bool {
        self.pairs
            .contains_key(&(source_lang.to_string(), target_lang.to_string()))
    }

    /// 按语言对做整词替换，不支持的语言对返回 `None`
    pub fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Option<String> {
        self.pairs
            .get(&(source_lang.to_string(), target_lang.to_string()))
            .map(|dict| dict.apply(text))
    }
}

impl Default for OfflineDictionary {
    fn default() -> Self {
        Self::builtin()
    }
}

/// 未翻译文本的标记
pub fn untranslated_marker(text: &str, target_lang: &str) -> String {
    format!("[{} translation unavailable] {}", target_lang, text)
}
