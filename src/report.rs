//! Text, XML and JSON renderings of a detection result.
use serde::Serialize;
use std::fmt::Write;

use crate::core::decoder::CpuInfo;
use crate::core::features::Feature;

/// Which features a report lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Selector {
    #[default]
    All,
    Supported,
    Unsupported,
}

impl Selector {
    fn admits(self, supported: bool) -> bool {
        match self {
            Selector::All => true,
            Selector::Supported => supported,
            Selector::Unsupported => !supported,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Group {
    #[default]
    All,
    /// AVX, AVX2 and the AVX-512 family.
    Avx,
}

impl Group {
    fn contains(self, feature: Feature) -> bool {
        match self {
            Group::All => true,
            Group::Avx => feature.is_avx_family(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filter {
    pub selector: Selector,
    pub group: Group,
}

impl Filter {
    pub fn new(selector: Selector, group: Group) -> Self {
        Self { selector, group }
    }

    pub fn entries<'a>(&self, info: &'a CpuInfo) -> impl Iterator<Item = (Feature, bool)> + 'a {
        let filter = *self;
        info.features
            .iter()
            .filter(move |&(f, s)| filter.group.contains(f) && filter.selector.admits(s))
    }
}

fn architecture(info: &CpuInfo) -> &'static str {
    if info.is_64bit() {
        "64-bit"
    } else {
        "32-bit"
    }
}

/// One header line, then one line per feature. With a narrowing selector only
/// the names are listed, since the status is implied.
pub fn render_text(info: &CpuInfo, filter: Filter) -> String {
    let identity = &info.identity;
    let mut out = if identity.brand.is_empty() {
        format!("[{}, {}]\n", identity.vendor, architecture(info))
    } else {
        format!("[{}, {}, {}]\n", identity.vendor, identity.brand, architecture(info))
    };
    for (feature, supported) in filter.entries(info) {
        let _ = match filter.selector {
            Selector::All if supported => writeln!(out, "{} supported", feature),
            Selector::All => writeln!(out, "{} not supported", feature),
            _ => writeln!(out, "{}", feature),
        };
    }
    out
}

pub fn render_xml(info: &CpuInfo, filter: Filter) -> String {
    let identity = &info.identity;
    let mut out = String::from("<cpu>\n<information>\n");
    let _ = writeln!(out, "<vendor>{}</vendor>", escape_xml(&identity.vendor));
    let _ = writeln!(out, "<brand>{}</brand>", escape_xml(&identity.brand));
    let _ = writeln!(out, "<architecture>{}</architecture>", architecture(info));
    out.push_str("</information>\n<features>\n");
    for (feature, supported) in filter.entries(info) {
        let _ = writeln!(
            out,
            "<feature name=\"{}\" supported=\"{}\"/>",
            escape_xml(feature.name()),
            supported
        );
    }
    out.push_str("</features>\n</cpu>\n");
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    vendor: &'a str,
    brand: &'a str,
    architecture: &'static str,
    features: Vec<JsonFeature>,
}

#[derive(Serialize)]
struct JsonFeature {
    name: &'static str,
    supported: bool,
}

pub fn render_json(info: &CpuInfo, filter: Filter) -> Result<String, serde_json::Error> {
    let report = JsonReport {
        vendor: &info.identity.vendor,
        brand: &info.identity.brand,
        architecture: architecture(info),
        features: filter
            .entries(info)
            .map(|(f, supported)| JsonFeature {
                name: f.name(),
                supported,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
