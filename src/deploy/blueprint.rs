//! Named site templates and their rendering.

use std::collections::BTreeMap;
use std::path::Path;

use crate::content::ContentPackage;
use crate::provisioning::SiteFile;

use super::DeployError;

/// Where a blueprint file's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// Text with `{{placeholder}}` slots.
    Template(String),
    /// The content package serialized as JSON.
    ContentJson,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintFile {
    /// Relative to the site root. May contain placeholders.
    pub path: String,
    pub source: FileSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    pub id: String,
    pub files: Vec<BlueprintFile>,
    /// Path (unrendered) of the page that carries the deploy marker.
    pub front_page: String,
    pub post_install: Option<String>,
}

/// Values substituted into a blueprint.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub content: &'a ContentPackage,
    pub client_slug: &'a str,
    pub deploy_marker: &'a str,
}

/// A rendered blueprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub files: Vec<SiteFile>,
    pub front_page_html: String,
    pub post_install: Option<String>,
}

impl Blueprint {
    pub fn render(&self, ctx: RenderContext<'_>) -> Result<Rendered, DeployError> {
        let mut files = Vec::with_capacity(self.files.len());
        let mut front_page_html = None;
        for file in &self.files {
            let contents = match &file.source {
                FileSource::Template(text) => substitute(text, ctx),
                FileSource::ContentJson => serde_json::to_string_pretty(ctx.content)
                    .map_err(|e| DeployError::Validation(format!("content package: {e}")))?,
            };
            if file.path == self.front_page {
                front_page_html = Some(contents.clone());
            }
            files.push(SiteFile {
                path: substitute_path(&file.path, ctx),
                contents,
            });
        }
        let front_page_html = front_page_html.ok_or_else(|| {
            DeployError::Validation(format!(
                "blueprint `{}` has no front page `{}`",
                self.id, self.front_page
            ))
        })?;
        Ok(Rendered {
            files,
            front_page_html,
            post_install: self.post_install.as_deref().map(|cmd| substitute_path(cmd, ctx)),
        })
    }
}

/// Blueprints by id.
#[derive(Debug, Clone, Default)]
pub struct BlueprintRegistry {
    blueprints: BTreeMap<String, Blueprint>,
}

impl BlueprintRegistry {
    /// `wp-starter` (WordPress child theme) and `static-landing`.
    pub fn builtin() -> Self {
        let theme = "wp-content/themes/demoforge-{{client_slug}}";
        let wp_starter = Blueprint {
            id: "wp-starter".into(),
            files: vec![
                template(
                    format!("{theme}/front-page.php"),
                    include_str!("../../blueprints/wp-starter/front-page.php"),
                ),
                template(
                    format!("{theme}/style.css"),
                    include_str!("../../blueprints/wp-starter/style.css"),
                ),
                template(
                    format!("{theme}/functions.php"),
                    include_str!("../../blueprints/wp-starter/functions.php"),
                ),
                BlueprintFile {
                    path: format!("{theme}/content.json"),
                    source: FileSource::ContentJson,
                },
            ],
            front_page: format!("{theme}/front-page.php"),
            post_install: Some("wp theme activate demoforge-{{client_slug}}".into()),
        };
        let static_landing = Blueprint {
            id: "static-landing".into(),
            files: vec![template(
                "index.html".into(),
                include_str!("../../blueprints/static-landing/index.html"),
            )],
            front_page: "index.html".into(),
            post_install: None,
        };

        let mut registry = Self::default();
        registry.register(wp_starter);
        registry.register(static_landing);
        registry
    }

    /// Add or replace a blueprint.
    pub fn register(&mut self, blueprint: Blueprint) {
        self.blueprints.insert(blueprint.id.clone(), blueprint);
    }

    pub fn get(&self, id: &str) -> Result<&Blueprint, DeployError> {
        self.blueprints
            .get(id)
            .ok_or_else(|| DeployError::UnknownBlueprint(id.to_string()))
    }

    /// Register every subdirectory of `dir` as a blueprint named after it.
    /// Each file becomes a template; the front page is `index.html`, or
    /// `front-page.php` when there is no `index.html`.
    pub fn load_dir(&mut self, dir: &Path) -> std::io::Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let mut files = Vec::new();
            collect_templates(&entry.path(), "", &mut files)?;
            files.sort_by(|a, b| a.path.cmp(&b.path));
            let front_page = ["index.html", "front-page.php"]
                .into_iter()
                .find(|name| files.iter().any(|f| f.path == *name))
                .map(str::to_string);
            let Some(front_page) = front_page else {
                tracing::warn!(blueprint = %id, "skipping blueprint without index.html or front-page.php");
                continue;
            };
            self.register(Blueprint {
                id,
                files,
                front_page,
                post_install: None,
            });
            loaded += 1;
        }
        Ok(loaded)
    }
}

fn template(path: String, text: &str) -> BlueprintFile {
    BlueprintFile {
        path,
        source: FileSource::Template(text.to_string()),
    }
}

fn collect_templates(dir: &Path, prefix: &str, out: &mut Vec<BlueprintFile>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let rel = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        if entry.file_type()?.is_dir() {
            collect_templates(&entry.path(), &rel, out)?;
        } else {
            out.push(template(rel, &std::fs::read_to_string(entry.path())?));
        }
    }
    Ok(())
}

/// Replace every known placeholder. Unknown `{{...}}` sequences are left alone.
fn substitute(text: &str, ctx: RenderContext<'_>) -> String {
    let c = ctx.content;
    let services = c
        .services
        .iter()
        .map(|s| format!("      <li>{}</li>", escape_html(s)))
        .collect::<Vec<_>>()
        .join("\n");
    let pairs = [
        ("{{site_title}}", escape_html(&c.site_title)),
        ("{{tagline}}", escape_html(&c.tagline)),
        ("{{about}}", escape_html(&c.about)),
        ("{{services}}", services),
        ("{{call_to_action}}", escape_html(&c.call_to_action)),
        ("{{client_slug}}", escape_html(ctx.client_slug)),
        ("{{deploy_marker}}", escape_html(ctx.deploy_marker)),
        ("{{body_html}}", c.body_html.clone().unwrap_or_default()),
    ];
    replace_all(text, &pairs)
}

/// Paths and commands only take the slug.
fn substitute_path(text: &str, ctx: RenderContext<'_>) -> String {
    text.replace("{{client_slug}}", ctx.client_slug)
}

/// Single left-to-right pass so substituted values are never re-scanned.
fn replace_all(text: &str, pairs: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match pairs.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> ContentPackage {
        ContentPackage {
            site_title: "Joe's <Plumbing>".into(),
            tagline: "Fast & friendly".into(),
            about: "Since 1990.".into(),
            services: vec!["Leaks".into(), "Drains".into()],
            call_to_action: "Call now".into(),
            body_html: None,
        }
    }

    fn ctx(content: &ContentPackage) -> RenderContext<'_> {
        RenderContext {
            content,
            client_slug: "joes",
            deploy_marker: "demoforge-j1",
        }
    }

    #[test]
    fn wp_starter_renders_theme_files() {
        let registry = BlueprintRegistry::builtin();
        let content = content();
        let rendered = registry.get("wp-starter").unwrap().render(ctx(&content)).unwrap();

        let paths: Vec<_> = rendered.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "wp-content/themes/demoforge-joes/front-page.php",
                "wp-content/themes/demoforge-joes/style.css",
                "wp-content/themes/demoforge-joes/functions.php",
                "wp-content/themes/demoforge-joes/content.json",
            ]
        );
        assert!(rendered.front_page_html.contains("<!-- demoforge-j1 -->"));
        assert!(rendered.front_page_html.contains("<h1>Joe&#39;s &lt;Plumbing&gt;</h1>"));
        assert!(rendered.front_page_html.contains("<li>Leaks</li>"));
        assert_eq!(
            rendered.post_install.as_deref(),
            Some("wp theme activate demoforge-joes")
        );

        let json: ContentPackage = serde_json::from_str(&rendered.files[3].contents).unwrap();
        assert_eq!(json, content);
    }

    #[test]
    fn body_html_is_injected_verbatim() {
        let registry = BlueprintRegistry::builtin();
        let content = ContentPackage::from_html("Acme", "<section id=\"x\">Hi</section>");
        let rendered = registry.get("static-landing").unwrap().render(ctx(&content)).unwrap();
        assert_eq!(rendered.files.len(), 1);
        assert!(rendered.front_page_html.contains("<section id=\"x\">Hi</section>"));
        assert!(rendered.front_page_html.contains("<title>Acme</title>"));
    }

    #[test]
    fn placeholders_in_values_are_not_expanded() {
        let mut content = content();
        content.tagline = "{{deploy_marker}}".into();
        let out = substitute("{{tagline}} {{unknown}}", ctx(&content));
        assert_eq!(out, "{{deploy_marker}} {{unknown}}");
    }

    #[test]
    fn unknown_blueprint() {
        let err = BlueprintRegistry::builtin().get("drupal").unwrap_err();
        assert!(matches!(err, DeployError::UnknownBlueprint(id) if id == "drupal"));
    }

    #[test]
    fn loads_blueprints_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bp = dir.path().join("minimal");
        std::fs::create_dir_all(bp.join("assets")).unwrap();
        std::fs::write(bp.join("index.html"), "<h1>{{site_title}}</h1><!-- {{deploy_marker}} -->").unwrap();
        std::fs::write(bp.join("assets/site.css"), "body{}").unwrap();
        std::fs::create_dir_all(dir.path().join("broken")).unwrap();

        let mut registry = BlueprintRegistry::builtin();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 1);

        let content = content();
        let rendered = registry.get("minimal").unwrap().render(ctx(&content)).unwrap();
        assert_eq!(rendered.files[0].path, "assets/site.css");
        assert!(rendered.front_page_html.starts_with("<h1>Joe&#39;s"));
        assert!(registry.get("broken").is_err());
    }
}
