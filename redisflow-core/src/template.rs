use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::params;
use crate::pipeline::PipelineGraph;
use crate::{Error, Result};

const TEMPLATE_VERSION: u32 = 1;
const FILE_SCHEME: &str = "file://";

/// A parameter the template still needs a value for at launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateParameter {
    pub name: String,
    pub description: String,
}

/// Template is the reusable artifact: the pipeline graph with its deferred parameters left open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub version: u32,
    pub parameters: Vec<TemplateParameter>,
    pub graph: PipelineGraph,
}

impl Template {
    pub fn new(graph: PipelineGraph) -> Self {
        let parameters = graph
            .sink
            .unresolved_params()
            .into_iter()
            .map(|name| TemplateParameter {
                name: name.to_string(),
                description: params::lookup(name)
                    .map(|p| p.description.to_string())
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            version: TEMPLATE_VERSION,
            parameters,
            graph,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let template: Template = serde_json::from_slice(bytes)
            .map_err(|e| Error::TemplateIo(format!("decoding template: {e}")))?;
        if template.version != TEMPLATE_VERSION {
            return Err(Error::TemplateIo(format!(
                "unsupported template version {}, expected {TEMPLATE_VERSION}",
                template.version
            )));
        }
        template.graph.validate()?;
        Ok(template)
    }

    /// Reads a template written by [`FsTemplateWriter`].
    pub async fn load(location: &str) -> Result<Self> {
        let path = local_path(location)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::TemplateIo(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&bytes)
    }
}

/// Persists serialized templates. The location format is up to the implementation.
#[trait_variant::make(TemplateWriter: Send)]
#[allow(dead_code)]
pub trait LocalTemplateWriter {
    async fn write(&self, location: &str, contents: &[u8]) -> Result<()>;
}

/// Writes templates to the local filesystem. Accepts plain paths and `file://` URIs.
#[derive(Debug, Clone, Default)]
pub struct FsTemplateWriter;

impl TemplateWriter for FsTemplateWriter {
    async fn write(&self, location: &str, contents: &[u8]) -> Result<()> {
        let path = local_path(location)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::TemplateIo(format!("creating {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| Error::TemplateIo(format!("writing {}: {e}", path.display())))?;
        info!(path = %path.display(), bytes = contents.len(), "Template written");
        Ok(())
    }
}

fn local_path(location: &str) -> Result<PathBuf> {
    let path = location.strip_prefix(FILE_SCHEME).unwrap_or(location);
    if let Some((scheme, _)) = path.split_once("://") {
        return Err(Error::TemplateIo(format!(
            "unsupported template location scheme {scheme}:// in {location}"
        )));
    }
    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{FsTemplateWriter, Template, TemplateWriter, local_path};
    use crate::Error;
    use crate::config::params::LaunchInput;
    use crate::config::resolve;
    use crate::pipeline::PipelineGraph;

    fn template_graph(options: &[(&str, &str)]) -> PipelineGraph {
        let config = resolve(&options.iter().copied().collect::<LaunchInput>()).unwrap();
        PipelineGraph::build(&config).unwrap()
    }

    #[test]
    fn test_template_lists_unresolved_parameters() {
        let template = Template::new(template_graph(&[("templateLocation", "/tmp/t.json")]));
        let names: Vec<_> = template.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["redisHost", "redisPort"]);
        assert_eq!(template.parameters[0].description, "Redis host");
    }

    #[test]
    fn test_serialized_template_carries_no_deferred_values() {
        let template = Template::new(template_graph(&[("templateLocation", "/tmp/t.json")]));
        let json: serde_json::Value = serde_json::from_slice(&template.to_json().unwrap()).unwrap();

        let sink = &json["graph"]["sink"];
        assert_eq!(sink["host"], serde_json::json!({"state": "unresolved", "name": "redisHost"}));
        assert_eq!(sink["port"], serde_json::json!({"state": "unresolved", "name": "redisPort"}));
        assert!(sink["host"].get("value").is_none());
        assert!(sink["port"].get("value").is_none());
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(
            Template::from_json(b"not json"),
            Err(Error::TemplateIo(_))
        ));

        let mut template = Template::new(template_graph(&[("templateLocation", "/tmp/t.json")]));
        template.version = 99;
        let bytes = serde_json::to_vec(&template).unwrap();
        assert!(matches!(
            Template::from_json(&bytes),
            Err(Error::TemplateIo(_))
        ));
    }

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("/tmp/t.json").unwrap(), PathBuf::from("/tmp/t.json"));
        assert_eq!(
            local_path("file:///tmp/t.json").unwrap(),
            PathBuf::from("/tmp/t.json")
        );
        assert!(matches!(
            local_path("gs://bucket/tpl"),
            Err(Error::TemplateIo(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_writer_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("nested/dir/template.json");
        let location = location.to_str().unwrap();

        let template = Template::new(template_graph(&[
            ("templateLocation", "/unused"),
            ("records", "a=1,b=2"),
            ("redisPort", "6380"),
        ]));
        FsTemplateWriter
            .write(location, &template.to_json().unwrap())
            .await
            .unwrap();

        let loaded = Template::load(location).await.unwrap();
        assert_eq!(loaded, template);
        assert_eq!(loaded.parameters.len(), 1);
        assert_eq!(loaded.graph.sink.port.as_resolved(), Some(&6380));
    }

    #[tokio::test]
    async fn test_fs_writer_unsupported_scheme() {
        let result = FsTemplateWriter.write("gs://bucket/tpl", b"{}").await;
        assert!(matches!(result, Err(Error::TemplateIo(_))));
    }
}
