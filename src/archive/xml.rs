// src/archive/xml.rs

//! Serde mapping of `metadata.xml` and `files.xml`

use super::{FileRecord, Metadata, Update};
use crate::error::{Error, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct XmlDocument {
    #[serde(rename = "Source")]
    source: Option<XmlSource>,
    #[serde(rename = "Package")]
    package: XmlPackage,
}

#[derive(Debug, Deserialize)]
struct XmlSource {
    #[serde(rename = "Name")]
    name: String,
}

/// Localised text such as `<Summary xml:lang="en">`
#[derive(Debug, Deserialize)]
struct XmlText {
    #[serde(rename = "@xml:lang", default)]
    lang: Option<String>,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct XmlPackage {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Summary", default)]
    summary: Vec<XmlText>,
    #[serde(rename = "Description", default)]
    description: Vec<XmlText>,
    #[serde(rename = "PartOf", default)]
    part_of: Option<String>,
    #[serde(rename = "License", default)]
    license: Vec<String>,
    #[serde(rename = "RuntimeDependencies", default)]
    runtime_dependencies: Option<XmlDependencies>,
    #[serde(rename = "History")]
    history: XmlHistory,
    #[serde(rename = "Distribution", default)]
    distribution: Option<String>,
    #[serde(rename = "DistributionRelease", default)]
    distribution_release: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlDependencies {
    #[serde(rename = "Dependency", default)]
    dependencies: Vec<XmlText>,
}

#[derive(Debug, Deserialize)]
struct XmlHistory {
    #[serde(rename = "Update", default)]
    updates: Vec<XmlUpdate>,
}

#[derive(Debug, Deserialize)]
struct XmlUpdate {
    #[serde(rename = "@release")]
    release: u32,
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Date", default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlFiles {
    #[serde(rename = "File", default)]
    files: Vec<XmlFile>,
}

#[derive(Debug, Deserialize)]
struct XmlFile {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Type", default)]
    file_type: Option<String>,
    #[serde(rename = "Size", default)]
    size: Option<u64>,
    #[serde(rename = "Mode", default)]
    mode: Option<String>,
    #[serde(rename = "Hash", default)]
    hash: Option<String>,
}

/// English text if present, otherwise the first translation
fn pick_text(texts: Vec<XmlText>) -> String {
    let mut fallback = None;
    for text in texts {
        match text.lang.as_deref() {
            None | Some("en") => return text.value.trim().to_string(),
            Some(_) if fallback.is_none() => fallback = Some(text.value),
            Some(_) => {}
        }
    }
    fallback.map(|t| t.trim().to_string()).unwrap_or_default()
}

pub(super) fn parse_metadata(content: &str) -> Result<Metadata> {
    let doc: XmlDocument = quick_xml::de::from_str(content)
        .map_err(|e| Error::Archive(format!("invalid metadata.xml: {}", e)))?;
    let pkg = doc.package;

    if pkg.history.updates.is_empty() {
        return Err(Error::Archive(format!(
            "metadata.xml for {} has no history",
            pkg.name
        )));
    }

    let history = pkg
        .history
        .updates
        .into_iter()
        .map(|u| Update {
            release: u.release,
            version: u.version.trim().to_string(),
            date: u.date,
        })
        .collect();

    let runtime_dependencies = pkg
        .runtime_dependencies
        .map(|deps| {
            deps.dependencies
                .into_iter()
                .map(|d| d.value.trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(Metadata {
        source_name: doc
            .source
            .map(|s| s.name)
            .unwrap_or_else(|| pkg.name.clone()),
        name: pkg.name,
        summary: pick_text(pkg.summary),
        description: pick_text(pkg.description),
        licenses: pkg.license,
        component: pkg.part_of,
        distribution: pkg.distribution,
        distribution_release: pkg.distribution_release,
        runtime_dependencies,
        history,
    })
}

pub(super) fn parse_files(content: &str) -> Result<Vec<FileRecord>> {
    let doc: XmlFiles = quick_xml::de::from_str(content)
        .map_err(|e| Error::Archive(format!("invalid files.xml: {}", e)))?;

    Ok(doc
        .files
        .into_iter()
        .map(|f| FileRecord {
            path: f.path,
            file_type: f.file_type,
            size: f.size,
            mode: f.mode,
            hash: f.hash,
        })
        .collect())
}
