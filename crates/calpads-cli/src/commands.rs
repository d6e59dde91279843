//! Subcommand handlers.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use calpads::{
    CalpadsClient, ClientConfig, Credentials, ExtractRequestOutcome, ExtractRequestSpec, ExtractType,
    ExtractVariant, FileUpload, ParamValue, ParamValues, PollOptions, PostFileSpec, ReportCategory,
    ReportFormat, ReportOutcome, ReportRequest,
};

pub struct ReportArgs {
    pub lea: String,
    pub code: String,
    pub category: String,
    pub format: String,
    pub values: Option<String>,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
}

pub struct PostArgs {
    pub lea: String,
    pub file: PathBuf,
    pub values: Option<String>,
    pub interval: u64,
    pub timeout: u64,
    pub override_rejections: bool,
    pub rejections: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::load(path).with_context(|| format!("reading config {}", path.display())),
        None => Ok(ClientConfig::from_env()),
    }
}

/// Sign in; a client that did not connect is an error here.
fn connect(config: Option<&Path>) -> Result<CalpadsClient> {
    let config = load_config(config)?;
    let credentials = Credentials::from_env()?;
    let client = CalpadsClient::connect(config, credentials)?;
    if !client.is_connected() {
        bail!("sign-in failed; check CALPADS_USERNAME and CALPADS_PASSWORD");
    }
    Ok(client)
}

/// Parse `--values '{"Name": value, ...}'`.
fn parse_values(raw: Option<&str>) -> Result<ParamValues> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(raw).context("--values must be a JSON object")?;
    object
        .into_iter()
        .map(|(name, value)| {
            let value: ParamValue =
                serde_json::from_value(value).with_context(|| format!("unsupported value for {name}"))?;
            Ok((name, value))
        })
        .collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn check(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let client = CalpadsClient::connect(config, Credentials::from_env()?)?;
    if client.is_connected() {
        println!("connected as {}", client.username());
        Ok(())
    } else {
        bail!("not connected (last page: {:?})", client.history().last().map(|p| p.url.as_str()))
    }
}

pub fn leas(config: Option<&Path>) -> Result<()> {
    let mut client = connect(config)?;
    for lea in client.leas()? {
        println!("{}\t{}", lea.value, lea.label);
    }
    Ok(())
}

pub fn report(config: Option<&Path>, args: ReportArgs) -> Result<()> {
    let category: ReportCategory = args.category.parse()?;
    let format: ReportFormat = args.format.parse()?;
    let values = parse_values(args.values.as_deref())?;
    if !args.dry_run && args.output.is_none() {
        bail!("--output is required unless --dry-run is given");
    }

    let mut request = ReportRequest::new(args.lea, args.code, category)
        .format(format)
        .values(values)
        .dry_run(args.dry_run);
    if let Some(output) = args.output {
        request = request.destination(output);
    }

    let mut client = connect(config)?;
    match client.download_report(&request)? {
        ReportOutcome::Described(params) => print_json(&params),
        ReportOutcome::Downloaded(bytes) => {
            eprintln!("  Saved {} bytes", bytes.len());
            Ok(())
        }
    }
}

pub fn request_extract(
    config: Option<&Path>,
    lea: &str,
    extract_type: &str,
    variant: &str,
    values: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let extract: ExtractType = extract_type.parse()?;
    let variant: ExtractVariant = variant.parse()?;
    let spec = ExtractRequestSpec::new(lea, extract)
        .variant(variant)
        .values(parse_values(values)?)
        .dry_run(dry_run);

    let mut client = connect(config)?;
    match client.request_extract(&spec)? {
        ExtractRequestOutcome::Described(params) => print_json(&params),
        ExtractRequestOutcome::Submitted(true) => {
            println!("extract requested");
            Ok(())
        }
        ExtractRequestOutcome::Submitted(false) => bail!("the server did not confirm the extract request"),
    }
}

pub fn download_extract(config: Option<&Path>, lea: &str, interval: u64, timeout: u64, output: &Path) -> Result<()> {
    let mut client = connect(config)?;
    match client.download_extract(lea, PollOptions::from_secs(interval, timeout), Some(output))? {
        Some(bytes) => {
            eprintln!("  Saved {} bytes to {}", bytes.len(), output.display());
            Ok(())
        }
        None => bail!("extract did not complete within {timeout}s"),
    }
}

pub fn upload(config: Option<&Path>, lea: &str, file: PathBuf, values: Option<&str>, dry_run: bool) -> Result<()> {
    let mut client = connect(config)?;
    if dry_run {
        return print_json(&client.describe_upload_form(lea)?);
    }
    let upload = FileUpload::new(lea, file).values(parse_values(values)?);
    if client.upload_file(&upload)? {
        println!("uploaded");
        Ok(())
    } else {
        bail!("upload was rejected")
    }
}

pub fn post(config: Option<&Path>, args: PostArgs) -> Result<()> {
    let upload = FileUpload::new(&args.lea, args.file).values(parse_values(args.values.as_deref())?);
    let mut spec = PostFileSpec::new(upload)
        .poll(PollOptions::from_secs(args.interval, args.timeout))
        .override_rejections(args.override_rejections);
    if let Some(path) = args.rejections {
        spec = spec.rejections_destination(path);
    }

    let mut client = connect(config)?;
    if client.post_file(&spec)? {
        println!("posted");
        Ok(())
    } else {
        bail!("job was not posted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values_accepts_every_shape() {
        let values = parse_values(Some(
            r#"{"ActiveStudents": true, "AcademicYear": "2024-2025", "School": ["Lincoln High"], "Grades": {"9": true, "10": false}}"#,
        ))
        .unwrap();
        assert_eq!(values.len(), 4);
        let get = |k: &str| values.iter().find(|(n, _)| n == k).map(|(_, v)| v.clone()).unwrap();
        assert_eq!(get("ActiveStudents"), ParamValue::Flag(true));
        assert_eq!(get("AcademicYear"), ParamValue::Text("2024-2025".to_string()));
        assert_eq!(get("School"), ParamValue::Choices(vec!["Lincoln High".to_string()]));
        assert!(matches!(get("Grades"), ParamValue::Selection(_)));
    }

    #[test]
    fn test_parse_values_rejects_non_objects() {
        assert!(parse_values(Some("[1, 2]")).is_err());
        assert!(parse_values(None).unwrap().is_empty());
    }
}
