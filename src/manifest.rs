//! OTA installation manifests.
//!
//! iOS installs an app from an `itms-services://?action=download-manifest`
//! link by fetching a plist that points at the `.ipa`. The device refuses
//! asset URLs that are not https, so every URL built here is https no matter
//! how the request reached us.

use crate::error::Result;
use crate::store::StagedArtifact;
use plist::{Dictionary, Value};

/// Route the packages are served from.
pub const ARTIFACT_ROUTE: &str = "/api/download-file";
/// The real version is inside the package; installation does not check it.
pub const BUNDLE_VERSION: &str = "1.0";

pub fn package_url(public_host: &str, file_name: &str) -> String {
    format!("https://{}{}/{}", bare_host(public_host), ARTIFACT_ROUTE, file_name)
}

/// Display title from the last segment of a bundle id:
/// `com.burbn.instagram` becomes `Instagram`.
pub fn app_title(bundle_id: &str) -> String {
    let last = bundle_id.rsplit('.').next().unwrap_or(bundle_id);
    let mut chars = last.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn bare_host(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
        .trim_end_matches('/')
}

fn string(value: &str) -> Value {
    Value::String(value.to_string())
}

pub fn build(bundle_id: &str, artifact: &StagedArtifact, public_host: &str) -> Result<String> {
    let mut asset = Dictionary::new();
    asset.insert("kind".to_string(), string("software-package"));
    asset.insert(
        "url".to_string(),
        Value::String(package_url(public_host, &artifact.file_name)),
    );

    let mut metadata = Dictionary::new();
    metadata.insert("bundle-identifier".to_string(), string(bundle_id));
    metadata.insert("bundle-version".to_string(), string(BUNDLE_VERSION));
    metadata.insert("kind".to_string(), string("software"));
    metadata.insert("title".to_string(), Value::String(app_title(bundle_id)));

    let mut item = Dictionary::new();
    item.insert("assets".to_string(), Value::Array(vec![Value::Dictionary(asset)]));
    item.insert("metadata".to_string(), Value::Dictionary(metadata));

    let mut root = Dictionary::new();
    root.insert("items".to_string(), Value::Array(vec![Value::Dictionary(item)]));

    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, &Value::Dictionary(root))?;
    Ok(String::from_utf8(buf)?)
}

/// Plain-text dump of everything that went into a manifest, for working out
/// why a device refuses to install.
pub fn build_debug_view(
    bundle_id: &str,
    artifact: &StagedArtifact,
    public_host: &str,
    detected_scheme: &str,
) -> Result<String> {
    let manifest = build(bundle_id, artifact, public_host)?;
    let host = bare_host(public_host);

    Ok(format!(
        "Protocol detected: {}\n\
         Host: {}\n\
         Base URL: https://{}\n\
         IPA File: {}\n\
         IPA URL: {}\n\
         Bundle ID: {}\n\
         App Name: {}\n\
         \n\
         ---MANIFEST---\n\
         {}",
        detected_scheme,
        host,
        host,
        artifact.file_name,
        package_url(public_host, &artifact.file_name),
        bundle_id,
        app_title(bundle_id),
        manifest
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn artifact() -> StagedArtifact {
        StagedArtifact {
            dir: PathBuf::from("/tmp/ipatool_1"),
            file_name: "com.burbn.instagram_1.0.ipa".to_string(),
            size: 42,
        }
    }

    fn dict<'a>(value: &'a Value, key: &str) -> &'a Value {
        value.as_dictionary().unwrap().get(key).unwrap()
    }

    #[test]
    fn title_capitalizes_last_segment() {
        assert_eq!(app_title("com.burbn.instagram"), "Instagram");
        assert_eq!(app_title("com.example.myApp"), "MyApp");
        assert_eq!(app_title("single"), "Single");
        assert_eq!(app_title("com.example."), "");
    }

    #[test]
    fn manifest_has_apple_plist_structure() {
        let xml = build("com.burbn.instagram", &artifact(), "192.168.1.10:443").unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(
            "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">"
        ));

        let value: Value = plist::from_bytes(xml.as_bytes()).unwrap();
        let items = dict(&value, "items").as_array().unwrap();
        assert_eq!(items.len(), 1);

        let assets = dict(&items[0], "assets").as_array().unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(dict(&assets[0], "kind").as_string(), Some("software-package"));
        assert_eq!(
            dict(&assets[0], "url").as_string(),
            Some("https://192.168.1.10:443/api/download-file/com.burbn.instagram_1.0.ipa")
        );

        let metadata = dict(&items[0], "metadata");
        assert_eq!(
            dict(metadata, "bundle-identifier").as_string(),
            Some("com.burbn.instagram")
        );
        assert_eq!(dict(metadata, "bundle-version").as_string(), Some("1.0"));
        assert_eq!(dict(metadata, "kind").as_string(), Some("software"));
        assert_eq!(dict(metadata, "title").as_string(), Some("Instagram"));
    }

    #[test]
    fn manifest_contains_exactly_one_https_url() {
        let xml = build("com.burbn.instagram", &artifact(), "example.local").unwrap();
        assert_eq!(xml.matches("<string>https://").count(), 1);
        assert_eq!(xml.matches("<string>http://").count(), 0);
    }

    #[test]
    fn http_host_is_forced_to_https() {
        let xml = build("com.burbn.instagram", &artifact(), "http://example.local/").unwrap();
        assert!(xml.contains(
            "<string>https://example.local/api/download-file/com.burbn.instagram_1.0.ipa</string>"
        ));
        assert_eq!(xml.matches("<string>https://").count(), 1);
    }

    #[test]
    fn debug_view_lists_inputs_then_manifest() {
        let text =
            build_debug_view("com.burbn.instagram", &artifact(), "example.local", "http").unwrap();
        let (header, manifest) = text.split_once("---MANIFEST---\n").unwrap();

        assert!(header.contains("Protocol detected: http\n"));
        assert!(header.contains("Host: example.local\n"));
        assert!(header.contains("Base URL: https://example.local\n"));
        assert!(header.contains("IPA File: com.burbn.instagram_1.0.ipa\n"));
        assert!(header.contains("Bundle ID: com.burbn.instagram\n"));
        assert!(header.contains("App Name: Instagram\n"));
        assert_eq!(
            manifest,
            build("com.burbn.instagram", &artifact(), "example.local").unwrap()
        );
    }
}
