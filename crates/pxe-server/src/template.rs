//! Boot artifact rendering
//!
//! Builds the per-request [`TemplateContext`] for a (host, profile, image)
//! triple and renders it with minijinja. Templates ship embedded in the binary
//! and can be overridden file-by-file from a directory.

use crate::error::{PxeError, Result};
use crate::identity::{artifact_dir_name, host_slug, instance_id, safe_hostname};
use crate::installer::TemplateDefaults;
use minijinja::{AutoEscape, Environment, ErrorKind};
use provisioning_store::{HostRecord, ImageMetadata, ProvisioningMechanism, ProvisioningProfile};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

const PXELINUX_TEMPLATE: &str = include_str!("../templates/pxelinux.cfg.j2");
const USER_DATA_TEMPLATE: &str = include_str!("../templates/cloudinit/user-data.j2");
const META_DATA_TEMPLATE: &str = include_str!("../templates/cloudinit/meta-data.j2");
const KICKSTART_TEMPLATE: &str = include_str!("../templates/kickstart/ks.cfg.j2");

/// Rendered artifact kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKey {
    /// `pxelinux.cfg/<name>` boot menu
    PxeLinux,
    /// cloud-init `user-data`
    CloudInitUserData,
    /// cloud-init `meta-data`
    CloudInitMetaData,
    /// Anaconda `ks.cfg`
    Kickstart,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 4] = [
        TemplateKey::PxeLinux,
        TemplateKey::CloudInitUserData,
        TemplateKey::CloudInitMetaData,
        TemplateKey::Kickstart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::PxeLinux => "pxelinux.cfg",
            TemplateKey::CloudInitUserData => "cloudinit/user-data",
            TemplateKey::CloudInitMetaData => "cloudinit/meta-data",
            TemplateKey::Kickstart => "kickstart/ks.cfg",
        }
    }

    /// File name relative to the templates directory
    pub fn file_name(&self) -> String {
        format!("{}.j2", self.as_str())
    }
}

fn embedded_template(file_name: &str) -> Option<&'static str> {
    match file_name {
        "pxelinux.cfg.j2" => Some(PXELINUX_TEMPLATE),
        "cloudinit/user-data.j2" => Some(USER_DATA_TEMPLATE),
        "cloudinit/meta-data.j2" => Some(META_DATA_TEMPLATE),
        "kickstart/ks.cfg.j2" => Some(KICKSTART_TEMPLATE),
        _ => None,
    }
}

/// `value` unless it is blank, then `fallback`
fn or_default(value: Option<String>, fallback: String) -> String {
    match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => fallback,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateIdentifiers {
    pub hostname: String,
    pub instance_id: String,
    pub slug: String,
}

/// Boot payload locations, storage-relative and absolute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub kernel_relative: String,
    pub initrd_relative: String,
    pub iso_relative: String,
    pub stage2_relative: String,
    pub kernel_http: String,
    pub initrd_http: String,
    pub iso_http: String,
    pub stage2_http: String,
}

/// URLs of the profile-scoped seed files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileFiles {
    pub user_data: String,
    pub meta_data: String,
    pub vendor_data: String,
    pub kickstart: String,
}

/// Everything a template can see. Built per request, never shared.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub host: Option<HostRecord>,
    pub profile: ProvisioningProfile,
    pub image: ImageMetadata,
    pub identifiers: TemplateIdentifiers,
    pub artifacts: ArtifactPaths,
    pub kernel_args: Vec<String>,
    pub kernel_args_joined: String,
    pub profile_base_relative: String,
    pub profile_base_http: String,
    pub profile_files: ProfileFiles,
    pub dns_servers: Vec<String>,
    pub templates: TemplateDefaults,
}

impl TemplateContext {
    /// Profile file path relative to the artifact roots
    pub fn profile_file_relative(&self, name: &str) -> String {
        format!("{}/{}", self.profile_base_relative, name.trim_start_matches('/'))
    }

    /// Absolute profile file URL, or the relative path with no base URL
    pub fn profile_file_http(&self, name: &str) -> String {
        match self.profile_base_http.trim_end_matches('/') {
            "" => self.profile_file_relative(name),
            base => format!("{base}/{}", name.trim_start_matches('/')),
        }
    }
}

/// Slug for the context: host address, then profile address, then profile
/// IPv4, then a time-derived token.
fn context_slug(host: Option<&HostRecord>, profile: &ProvisioningProfile) -> String {
    let candidates = [
        host.map(|h| h.management_address.clone()),
        profile.management_address.clone(),
        profile.ipv4_address.map(|ip| ip.to_string()),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(|value| host_slug(&value))
        .find(|slug| !slug.is_empty())
        .unwrap_or_else(|| {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            format!("{:08x}", crc32fast::hash(nanos.to_string().as_bytes()))
        })
}

/// Kernel command line for the image's provisioning mechanism.
///
/// Always starts with `ip=dhcp rd.neednet=1`; profile kernel params come
/// last; blank entries are dropped.
pub fn build_kernel_args(
    mechanism: ProvisioningMechanism,
    artifacts: &ArtifactPaths,
    profile_base_http: &str,
    profile_base_relative: &str,
    files: &ProfileFiles,
    profile_params: &[String],
) -> Vec<String> {
    let mut args = vec!["ip=dhcp".to_string(), "rd.neednet=1".to_string()];
    match mechanism {
        ProvisioningMechanism::CloudInit => {
            if !artifacts.iso_http.is_empty() {
                args.push(format!("url={}", artifacts.iso_http));
            }
            args.push("boot=casper".to_string());
            args.push("autoinstall".to_string());
            let mut seed = if profile_base_http.is_empty() {
                profile_base_relative.to_string()
            } else {
                profile_base_http.to_string()
            };
            if !seed.ends_with('/') {
                seed.push('/');
            }
            args.push(format!("ds=nocloud-net;s={seed}"));
            if files.user_data.starts_with("http") {
                args.push(format!("autoinstall url={}", files.user_data));
            }
        }
        ProvisioningMechanism::Kickstart => {
            args.push("ksdevice=bootif".to_string());
            if !files.kickstart.is_empty() {
                args.push(format!("inst.ks={}", files.kickstart));
            }
            if !artifacts.stage2_http.is_empty() {
                args.push(format!("inst.stage2={}", artifacts.stage2_http));
            }
        }
        ProvisioningMechanism::None
        | ProvisioningMechanism::Preseed
        | ProvisioningMechanism::AutoYast
        | ProvisioningMechanism::GuidedInstaller => {}
    }
    args.extend(profile_params.iter().cloned());
    args.into_iter()
        .map(|arg| arg.trim().to_string())
        .filter(|arg| !arg.is_empty())
        .collect()
}

/// Renders boot artifacts for resolved profiles.
pub struct TemplateRenderer {
    env: Environment<'static>,
    base_url: String,
    dns_servers: Vec<Ipv4Addr>,
    defaults: TemplateDefaults,
}

impl TemplateRenderer {
    /// `base_url` is the externally reachable HTTP root; `dns_servers` apply
    /// to profiles that name none.
    pub fn new(
        templates_directory: Option<PathBuf>,
        base_url: impl Into<String>,
        dns_servers: Vec<Ipv4Addr>,
        defaults: TemplateDefaults,
    ) -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("or_default", or_default);
        env.set_loader(move |name| {
            if let Some(dir) = &templates_directory {
                let path = dir.join(name);
                if path.is_file() {
                    return std::fs::read_to_string(&path).map(Some).map_err(|e| {
                        minijinja::Error::new(
                            ErrorKind::InvalidOperation,
                            format!("cannot read template {}", path.display()),
                        )
                        .with_source(e)
                    });
                }
            }
            Ok(embedded_template(name).map(str::to_string))
        });

        Self {
            env,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dns_servers,
            defaults,
        }
    }

    /// Base URL installers fetch artifacts from, without a trailing `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `/`-rooted path, prefixed with the base URL when one is configured
    pub fn absolute_url(&self, relative: &str) -> String {
        let path = format!("/{}", relative.trim_start_matches('/'));
        format!("{}{path}", self.base_url)
    }

    pub fn artifact_paths(&self, image: &ImageMetadata) -> ArtifactPaths {
        let dir = artifact_dir_name(&image.name);
        let relative = |leaf: &str| format!("/artifacts/{dir}/{leaf}");
        let (kernel, initrd, iso, stage2) = (
            relative("kernel"),
            relative("initrd"),
            relative("image.iso"),
            relative("stage2"),
        );
        ArtifactPaths {
            kernel_http: self.absolute_url(&kernel),
            initrd_http: self.absolute_url(&initrd),
            iso_http: self.absolute_url(&iso),
            stage2_http: self.absolute_url(&stage2),
            kernel_relative: kernel,
            initrd_relative: initrd,
            iso_relative: iso,
            stage2_relative: stage2,
        }
    }

    /// Assemble the render context. Inputs are cloned in.
    pub fn context(
        &self,
        host: Option<&HostRecord>,
        profile: &ProvisioningProfile,
        image: &ImageMetadata,
    ) -> TemplateContext {
        let slug = context_slug(host, profile);
        let profile_base_relative = format!("profiles/{slug}");
        let profile_base_http = self.absolute_url(&profile_base_relative);
        let dns_servers = if profile.dns_servers.is_empty() {
            &self.dns_servers
        } else {
            &profile.dns_servers
        };

        let mut ctx = TemplateContext {
            host: host.cloned(),
            profile: profile.clone(),
            image: image.clone(),
            identifiers: TemplateIdentifiers {
                hostname: safe_hostname(&slug),
                instance_id: instance_id(&slug),
                slug,
            },
            artifacts: self.artifact_paths(image),
            kernel_args: Vec::new(),
            kernel_args_joined: String::new(),
            profile_base_relative,
            profile_base_http,
            profile_files: ProfileFiles::default(),
            dns_servers: dns_servers.iter().map(ToString::to_string).collect(),
            templates: self.defaults.clone(),
        };
        ctx.profile_files = ProfileFiles {
            user_data: ctx.profile_file_http("cloud-init/user-data"),
            meta_data: ctx.profile_file_http("cloud-init/meta-data"),
            vendor_data: ctx.profile_file_http("cloud-init/vendor-data"),
            kickstart: ctx.profile_file_http("kickstart/ks.cfg"),
        };
        ctx.kernel_args = build_kernel_args(
            image.mechanism,
            &ctx.artifacts,
            &ctx.profile_base_http,
            &ctx.profile_base_relative,
            &ctx.profile_files,
            &profile.kernel_params,
        );
        ctx.kernel_args_joined = ctx.kernel_args.join(" ");
        ctx
    }

    /// Render `key` against `ctx`. Any template failure is fatal for the request.
    pub fn render(&self, key: TemplateKey, ctx: &TemplateContext) -> Result<Vec<u8>> {
        let rendered = self
            .env
            .get_template(&key.file_name())
            .and_then(|template| template.render(ctx));
        match rendered {
            Ok(text) => Ok(text.into_bytes()),
            Err(source) => {
                error!(
                    template = key.as_str(),
                    slug = %ctx.identifiers.slug,
                    image = %ctx.image.name,
                    error = %source,
                    "Template render failed"
                );
                Err(PxeError::Template {
                    key: key.as_str().to_string(),
                    identity: ctx.identifiers.slug.clone(),
                    source,
                })
            }
        }
    }
}
