//! Handler request models.
//!
//! Requests are validated when they cross the boundary (deserialization plus
//! [`Validate`]); the executor only ever sees values that passed.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;
use validator::{Validate, ValidationError};

use crate::error::{ModelError, ModelResult};
use crate::filter::IncludeExcludeFilter;
use crate::path::SafeRelativePath;

/// One or more source URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum UrlList {
    One(String),
    Many(Vec<String>),
}

impl UrlList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            UrlList::One(url) => vec![url.clone()],
            UrlList::Many(urls) => urls.clone(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            UrlList::One(url) => std::slice::from_ref(url),
            UrlList::Many(urls) => urls,
        };
        slice.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        match self {
            UrlList::One(_) => 1,
            UrlList::Many(urls) => urls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for UrlList {
    fn from(url: &str) -> Self {
        UrlList::One(url.to_string())
    }
}

impl fmt::Display for UrlList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlList::One(url) => f.write_str(url),
            UrlList::Many(urls) => write!(f, "[{}]", urls.join(", ")),
        }
    }
}

/// Where persisted files go: an object-store URL or a relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputRef {
    /// e.g. `s3://bucket/videoid/` or `file:///srv/media`
    Url(Url),
    /// Resolved against the persister's default root.
    Path(SafeRelativePath),
}

impl OutputRef {
    /// URL schemes a persister can serve.
    pub const SCHEMES: [&'static str; 2] = ["s3", "file"];

    /// Parse left to right: URL first, then relative path.
    pub fn parse(value: &str) -> ModelResult<Self> {
        let trimmed = value.trim();
        if trimmed.contains("://") {
            let url = Url::parse(trimmed).map_err(|e| ModelError::invalid_url(trimmed, e.to_string()))?;
            let destination = Self::Url(url);
            destination.check_scheme()?;
            return Ok(destination);
        }
        SafeRelativePath::new(value).map(Self::Path)
    }

    /// Reject URLs no persister can serve, and `s3://` URLs without a bucket.
    pub fn check_scheme(&self) -> ModelResult<()> {
        let OutputRef::Url(url) = self else {
            return Ok(());
        };
        match url.scheme() {
            "s3" if url.host_str().map_or(true, str::is_empty) => {
                Err(ModelError::invalid_url(url.as_str(), "missing bucket"))
            }
            scheme if Self::SCHEMES.contains(&scheme) => Ok(()),
            scheme => Err(ModelError::invalid_url(
                url.as_str(),
                format!("unsupported scheme '{scheme}', expected s3 or file"),
            )),
        }
    }
}

impl TryFrom<String> for OutputRef {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OutputRef> for String {
    fn from(value: OutputRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputRef::Url(url) => f.write_str(url.as_str()),
            OutputRef::Path(path) => f.write_str(path.as_str()),
        }
    }
}

impl JsonSchema for OutputRef {
    fn schema_name() -> String {
        "OutputRef".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

/// Output template: a single path or named templates per file kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OutputTemplate {
    Single(SafeRelativePath),
    Named(BTreeMap<String, SafeRelativePath>),
}

/// Engine options a caller may set per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_option_ranges"))]
pub struct DownloadOptions {
    // Format selection
    /// Video format code or selector expression.
    #[validate(length(min = 1))]
    pub format: Option<String>,
    /// Allow unplayable formats to be extracted and downloaded.
    pub allow_unplayable_formats: Option<bool>,
    /// Fields by which to sort the video formats.
    pub format_sort: Option<Vec<String>>,
    /// Force the given format_sort.
    pub format_sort_force: Option<bool>,

    // Output templates and paths
    /// Output name template, or templates per file kind.
    pub outtmpl: Option<OutputTemplate>,
    /// Placeholder for unavailable meta fields.
    pub outtmpl_na_placeholder: Option<String>,
    /// Do not allow '&' and spaces in file names.
    pub restrictfilenames: Option<bool>,
    /// Force filenames to be Windows compatible.
    pub windowsfilenames: Option<bool>,
    /// Limit length of filename (extension excluded).
    #[validate(range(min = 1))]
    pub trim_file_name: Option<u32>,

    /// Use the Last-modified header to set the file modification time.
    pub updatetime: Option<bool>,
    /// Write the video description to a .description file.
    pub writedescription: Option<bool>,
    /// Write the video metadata to a .info.json file.
    pub writeinfojson: Option<bool>,
    /// Also write playlist description, infojson etc.
    pub allow_playlist_files: Option<bool>,
    /// Remove internal metadata from the infojson.
    pub clean_infojson: Option<bool>,
    /// Extract video comments (written only with writeinfojson).
    pub getcomments: Option<bool>,
    /// Write the thumbnail image to a file.
    pub writethumbnail: Option<bool>,
    /// Write all thumbnail formats to files.
    pub write_all_thumbnails: Option<bool>,
    /// Write an internet shortcut file for the current platform.
    pub writelink: Option<bool>,
    /// Write a Windows internet shortcut file (.url).
    pub writeurllink: Option<bool>,
    /// Write a macOS internet shortcut file (.webloc).
    pub writewebloclink: Option<bool>,
    /// Write a Linux internet shortcut file (.desktop).
    pub writedesktoplink: Option<bool>,

    // Subtitles
    /// Write the video subtitles to a file.
    pub writesubtitles: Option<bool>,
    /// Write the automatically generated subtitles to a file.
    pub writeautomaticsub: Option<bool>,
    /// Subtitle format code.
    pub subtitlesformat: Option<String>,
    /// Subtitle languages to download (may be regex, may contain "all").
    #[validate(custom(function = "validate_non_blank_items"))]
    pub subtitleslangs: Option<Vec<String>>,

    // Filtering
    /// Download only titles matching this regex.
    pub matchtitle: Option<String>,
    /// Skip titles matching this regex.
    pub rejecttitle: Option<String>,
    /// Prefer free containers over non-free ones of the same quality.
    pub prefer_free_formats: Option<bool>,
    /// Keep the intermediate video file after post-processing.
    pub keepvideo: Option<bool>,
    /// Abort download if filesize is smaller than this many bytes.
    pub min_filesize: Option<u64>,
    /// Abort download if filesize is larger than this many bytes.
    pub max_filesize: Option<u64>,
    /// Minimum view count the video must have.
    pub min_views: Option<u64>,
    /// Maximum view count the video may have.
    pub max_views: Option<u64>,

    /// Use the video ID in the file name.
    pub useid: Option<bool>,
}

fn validate_option_ranges(options: &DownloadOptions) -> Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (options.min_filesize, options.max_filesize) {
        if min > max {
            return Err(ValidationError::new("filesize_range")
                .with_message(Cow::Borrowed("min_filesize must not exceed max_filesize")));
        }
    }
    if let (Some(min), Some(max)) = (options.min_views, options.max_views) {
        if min > max {
            return Err(ValidationError::new("views_range")
                .with_message(Cow::Borrowed("min_views must not exceed max_views")));
        }
    }
    Ok(())
}

fn validate_non_blank_items(items: &[String]) -> Result<(), ValidationError> {
    if items.iter().any(|item| item.trim().is_empty()) {
        return Err(ValidationError::new("blank_item")
            .with_message(Cow::Borrowed("list entries cannot be blank")));
    }
    Ok(())
}

fn validate_source_url(url: &str) -> Result<(), ValidationError> {
    if url.trim().is_empty() {
        return Err(ValidationError::new("blank_url").with_message(Cow::Borrowed("URL cannot be empty")));
    }
    // Keeps a URL from being read as an engine flag.
    if url.trim_start().starts_with('-') {
        return Err(ValidationError::new("url_flag")
            .with_message(Cow::Borrowed("URL cannot start with '-'")));
    }
    Ok(())
}

fn validate_output(output: &DownloadOutput) -> Result<(), ValidationError> {
    output.destination.check_scheme().map_err(|e| {
        ValidationError::new("destination").with_message(Cow::Owned(e.to_string()))
    })
}

fn validate_url_list(urls: &UrlList) -> Result<(), ValidationError> {
    if urls.is_empty() {
        return Err(ValidationError::new("empty_url_list")
            .with_message(Cow::Borrowed("at least one URL is required")));
    }
    urls.iter().try_for_each(validate_source_url)
}

/// Destination of a download plus the upload filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DownloadOutput {
    /// Output reference for downloaded content, e.g. `s3://bucket/videoid/`.
    #[serde(alias = "ref")]
    pub destination: OutputRef,
    /// Which files to upload, using glob patterns.
    #[serde(default)]
    pub filter: Option<IncludeExcludeFilter>,
}

/// Request for downloading one or more videos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct DownloadRequest {
    /// URL(s) to download.
    #[validate(custom(function = "validate_url_list"))]
    pub url: UrlList,
    #[validate(custom(function = "validate_output"))]
    pub output: DownloadOutput,
    /// Download options.
    #[serde(default)]
    #[validate(nested)]
    pub options: Option<DownloadOptions>,
}

impl DownloadRequest {
    /// Build and validate a request.
    pub fn new(
        url: impl Into<UrlList>,
        output: DownloadOutput,
        options: Option<DownloadOptions>,
    ) -> ModelResult<Self> {
        let request = Self {
            url: url.into(),
            output,
            options,
        };
        request.validate()?;
        Ok(request)
    }

    /// Deserialize and validate a JSON body.
    pub fn from_json(bytes: &[u8]) -> ModelResult<Self> {
        parse_validated(bytes)
    }

    /// Re-run validation, e.g. after deserializing from a queue payload.
    pub fn check(&self) -> ModelResult<()> {
        Ok(self.validate()?)
    }
}

/// Request for metadata extraction without downloading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExtractInfoRequest {
    /// URL to inspect.
    #[validate(custom(function = "validate_source_url"))]
    pub url: String,
    #[serde(default)]
    #[validate(nested)]
    pub options: Option<DownloadOptions>,
}

impl ExtractInfoRequest {
    pub fn new(url: impl Into<String>, options: Option<DownloadOptions>) -> ModelResult<Self> {
        let request = Self {
            url: url.into(),
            options,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn from_json(bytes: &[u8]) -> ModelResult<Self> {
        parse_validated(bytes)
    }

    pub fn check(&self) -> ModelResult<()> {
        Ok(self.validate()?)
    }
}

fn parse_validated<T: DeserializeOwned + Validate>(bytes: &[u8]) -> ModelResult<T> {
    let value: T = serde_json::from_slice(bytes).map_err(|e| ModelError::validation(e.to_string()))?;
    value.validate()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_request_from_json() {
        let body = br#"{
            "url": "https://www.youtube.com/watch?v=_fjbR0qKT8w",
            "output": {"ref": "s3://bucket/videoid/", "filter": {"exclude": ["**/*.pdf"]}},
            "options": {"format": "best", "writeinfojson": true}
        }"#;

        let request = DownloadRequest::from_json(body).unwrap();
        assert_eq!(request.url.len(), 1);
        assert!(matches!(request.output.destination, OutputRef::Url(ref u) if u.scheme() == "s3"));
        assert_eq!(request.output.filter.as_ref().unwrap().exclude(), ["**/*.pdf"]);
        let options = request.options.unwrap();
        assert_eq!(options.format.as_deref(), Some("best"));
        assert_eq!(options.writeinfojson, Some(true));
    }

    #[test]
    fn test_url_list_forms() {
        let many: UrlList = serde_json::from_str(r#"["https://a/1", "https://a/2"]"#).unwrap();
        assert_eq!(many.to_vec(), vec!["https://a/1", "https://a/2"]);

        let body = br#"{"url": [], "output": {"destination": "videos"}}"#;
        assert!(matches!(
            DownloadRequest::from_json(body),
            Err(ModelError::Validation(_))
        ));
    }

    #[test]
    fn test_url_cannot_look_like_a_flag() {
        assert!(ExtractInfoRequest::new("--exec rm", None).is_err());
        assert!(ExtractInfoRequest::new("  ", None).is_err());
        assert!(ExtractInfoRequest::new("https://x/y", None).is_ok());
    }

    #[test]
    fn test_output_ref_parsing() {
        assert!(matches!(OutputRef::parse("s3://bucket/prefix/"), Ok(OutputRef::Url(_))));
        assert!(matches!(OutputRef::parse("videos/2024"), Ok(OutputRef::Path(_))));
        assert!(OutputRef::parse("../escape").is_err());
        assert!(OutputRef::parse("/absolute").is_err());
        assert!(OutputRef::parse("").is_err());
    }

    #[test]
    fn test_output_ref_schemes() {
        assert!(OutputRef::parse("file:///srv/media/out").is_ok());
        assert!(matches!(
            OutputRef::parse("gs://bucket/x"),
            Err(ModelError::InvalidUrl { .. })
        ));
        assert!(OutputRef::parse("https://example.com/x").is_err());
        assert!(OutputRef::parse("s3:///prefix").is_err());

        let body = br#"{"url": "https://x/y", "output": {"destination": "gs://bucket/x"}}"#;
        assert!(DownloadRequest::from_json(body).is_err());
    }

    #[test]
    fn test_check_rejects_unsupported_destination() {
        let request = DownloadRequest {
            url: "https://x/y".into(),
            output: DownloadOutput {
                destination: OutputRef::Url(Url::parse("gs://bucket/x").unwrap()),
                filter: None,
            },
            options: None,
        };
        assert!(matches!(request.check(), Err(ModelError::Validation(_))));
    }

    #[test]
    fn test_outtmpl_validation() {
        let ok: DownloadOptions =
            serde_json::from_str(r#"{"outtmpl": "videos/%(title)s.%(ext)s"}"#).unwrap();
        assert!(matches!(ok.outtmpl, Some(OutputTemplate::Single(_))));

        let named: DownloadOptions = serde_json::from_str(
            r#"{"outtmpl": {"default": "v/%(id)s.%(ext)s", "thumbnail": "t/%(id)s.%(ext)s"}}"#,
        )
        .unwrap();
        assert!(matches!(named.outtmpl, Some(OutputTemplate::Named(ref m)) if m.len() == 2));

        assert!(serde_json::from_str::<DownloadOptions>(r#"{"outtmpl": "../x"}"#).is_err());
        assert!(serde_json::from_str::<DownloadOptions>(r#"{"outtmpl": "/abs/x"}"#).is_err());
        assert!(serde_json::from_str::<DownloadOptions>(
            r#"{"outtmpl": {"default": "ok", "thumbnail": "../bad"}}"#
        )
        .is_err());
    }

    #[test]
    fn test_unknown_options_rejected() {
        assert!(serde_json::from_str::<DownloadOptions>(r#"{"exec": "rm -rf /"}"#).is_err());
    }

    #[test]
    fn test_option_ranges() {
        let options = DownloadOptions {
            min_filesize: Some(10),
            max_filesize: Some(5),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = DownloadOptions {
            format: Some(String::new()),
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = DownloadOptions {
            subtitleslangs: Some(vec!["en".to_string(), " ".to_string()]),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_nested_options_validated_with_request() {
        let output = DownloadOutput {
            destination: OutputRef::parse("videos").unwrap(),
            filter: None,
        };
        let options = DownloadOptions {
            trim_file_name: Some(0),
            ..Default::default()
        };
        assert!(DownloadRequest::new("https://x/y", output, Some(options)).is_err());
    }

    #[test]
    fn test_request_schema_has_descriptions() {
        let schema = schemars::schema_for!(DownloadOptions);
        let json = serde_json::to_value(&schema).unwrap();
        let format = &json["properties"]["format"];
        assert!(format["description"].as_str().is_some());
    }
}
