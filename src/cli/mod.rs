//! SW-014: CLI subcommands: compile, args, run, deploy.

use crate::core::config::{self, EngineConfig};
use crate::core::executor::{DeploymentJob, Executor};
use crate::core::resolver::DirResolver;
use crate::core::types::{ExecutionPlan, ExecutionResult, RemoteTarget, Template};
use crate::core::{args, compiler::Compiler};
use crate::provenance::hasher;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a deployment template into an execution plan
    Compile {
        /// Template file (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Resource root; defaults to the template's directory
        #[arg(short, long)]
        resources: Option<PathBuf>,

        /// Write the plan here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the positional arguments a compiled plan passes to its entry script
    Args {
        /// Compiled plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Run a compiled plan against one target
    Run {
        /// Compiled plan (JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Target descriptor (YAML)
        #[arg(short, long)]
        target: PathBuf,

        /// Script to run; defaults to the plan's first script
        #[arg(short, long)]
        script: Option<String>,

        /// Session deadline in seconds (0 = configured default)
        #[arg(long, default_value_t = 0)]
        timeout: u64,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append execution events to this JSONL file
        #[arg(long)]
        event_log: Option<PathBuf>,
    },

    /// Compile a template and run it against one or more targets concurrently
    Deploy {
        /// Template file (YAML or JSON)
        #[arg(short, long)]
        file: PathBuf,

        /// Resource root; defaults to the template's directory
        #[arg(short, long)]
        resources: Option<PathBuf>,

        /// Target descriptors (YAML), one deployment per target
        #[arg(short, long, required = true)]
        target: Vec<PathBuf>,

        /// Session deadline in seconds (0 = configured default)
        #[arg(long, default_value_t = 0)]
        timeout: u64,

        /// Engine configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append execution events to this JSONL file
        #[arg(long)]
        event_log: Option<PathBuf>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Compile {
            file,
            resources,
            output,
            config,
        } => cmd_compile(&file, resources.as_deref(), output.as_deref(), config.as_deref()),
        Commands::Args { plan } => cmd_args(&plan),
        Commands::Run {
            plan,
            target,
            script,
            timeout,
            config,
            event_log,
        } => cmd_run(
            &plan,
            &target,
            script.as_deref(),
            timeout,
            config.as_deref(),
            event_log.as_deref(),
        ),
        Commands::Deploy {
            file,
            resources,
            target,
            timeout,
            config,
            event_log,
        } => cmd_deploy(
            &file,
            resources.as_deref(),
            &target,
            timeout,
            config.as_deref(),
            event_log.as_deref(),
        ),
    }
}

/// Load and validate the engine configuration, or defaults when no file is given.
fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let cfg = config::load_config(path)?;
    let errors = config::validate_config(&cfg);
    if errors.is_empty() {
        return Ok(cfg);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("invalid configuration".to_string())
}

fn load_template(path: &Path) -> Result<Template, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| format!("{}: {}", path.display(), e))
}

fn load_plan(path: &Path) -> Result<ExecutionPlan, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    ExecutionPlan::from_json(&content).map_err(|e| format!("{}: invalid plan: {}", path.display(), e))
}

fn load_target(path: &Path) -> Result<RemoteTarget, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_yaml_ng::from_str(&content).map_err(|e| format!("{}: invalid target: {}", path.display(), e))
}

fn compile_file(
    file: &Path,
    resources: Option<&Path>,
    cfg: &EngineConfig,
) -> Result<ExecutionPlan, String> {
    let template = load_template(file)?;
    let root = match resources {
        Some(r) => r.to_path_buf(),
        None => file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    Compiler::new(cfg.compiler.clone())
        .compile(&template, &DirResolver::new(root))
        .map_err(|e| format!("{}: {}", file.display(), e))
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start async runtime: {}", e))
}

fn executor(cfg: &EngineConfig, event_log: Option<&Path>) -> Executor {
    let executor = Executor::new(cfg.executor.clone());
    match event_log {
        Some(path) => executor.with_event_log(path),
        None => executor,
    }
}

fn print_result(result: &ExecutionResult) {
    println!(
        "{}:{} {} → succeeded in {:.1}s ({} attempt(s))",
        result.host,
        result.port,
        result.script,
        result.duration.as_secs_f64(),
        result.attempts
    );
    let stdout = result.stdout.trim_end();
    if !stdout.is_empty() {
        for line in stdout.lines() {
            println!("  | {}", line);
        }
    }
}

fn cmd_compile(
    file: &Path,
    resources: Option<&Path>,
    output: Option<&Path>,
    config: Option<&Path>,
) -> Result<(), String> {
    let cfg = load_engine_config(config)?;
    let plan = compile_file(file, resources, &cfg)?;
    let json = plan
        .to_json_pretty()
        .map_err(|e| format!("cannot serialize plan: {}", e))?;

    match output {
        Some(path) => {
            std::fs::write(path, format!("{}\n", json))
                .map_err(|e| format!("cannot write {}: {}", path.display(), e))?;
            let digest = hasher::hash_plan(&plan)?;
            eprintln!(
                "Compiled {} → {} ({})",
                file.display(),
                path.display(),
                digest
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn cmd_args(plan: &Path) -> Result<(), String> {
    let plan = load_plan(plan)?;
    let structured = plan
        .as_structured()
        .ok_or("legacy (v1) plans take no arguments")?;
    for arg in args::plan_arguments(structured).map_err(|e| e.to_string())? {
        println!("{}", arg);
    }
    Ok(())
}

fn cmd_run(
    plan: &Path,
    target: &Path,
    script: Option<&str>,
    timeout: u64,
    config: Option<&Path>,
    event_log: Option<&Path>,
) -> Result<(), String> {
    let cfg = load_engine_config(config)?;
    let plan = load_plan(plan)?;
    let target = load_target(target)?;
    let executor = executor(&cfg, event_log);

    let result = runtime()?.block_on(async {
        match script {
            Some(name) => executor.run_script(&plan, name, &target, timeout).await,
            None => executor.run(&plan, &target, timeout).await,
        }
    });

    let result = result.map_err(|e| e.to_string())?;
    print_result(&result);
    Ok(())
}

fn cmd_deploy(
    file: &Path,
    resources: Option<&Path>,
    targets: &[PathBuf],
    timeout: u64,
    config: Option<&Path>,
    event_log: Option<&Path>,
) -> Result<(), String> {
    let cfg = load_engine_config(config)?;
    let plan = Arc::new(compile_file(file, resources, &cfg)?);
    let jobs = targets
        .iter()
        .map(|path| {
            Ok(DeploymentJob {
                plan: Arc::clone(&plan),
                target: load_target(path)?,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let executor = executor(&cfg, event_log);
    let results = runtime()?.block_on(executor.run_many(jobs, timeout));

    let mut failed = 0;
    for (path, result) in targets.iter().zip(&results) {
        match result {
            Ok(r) => print_result(r),
            Err(e) => {
                failed += 1;
                eprintln!("{}: FAILED: {}", path.display(), e);
            }
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} deployment(s) failed", failed, results.len()));
    }
    println!();
    println!("Deploy complete: {} target(s).", results.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(dir.join("scripts/run.sh"), "#!/bin/sh\necho \"$1\"\n").unwrap();
        let template = dir.join("deploy.yaml");
        std::fs::write(
            &template,
            r#"
FormatVersion: "2.0.0"
Name: Deploy Tomcat
Body: "return deploy(args.port).stdout"
Parameters:
  port: 8080
Scripts:
  deploy:
    Type: Application
    EntryPoint: run.sh
    Files: []
"#,
        )
        .unwrap();
        template
    }

    #[test]
    fn test_sw014_compile_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let template = bundle(dir.path());
        let out = dir.path().join("plan.json");
        cmd_compile(&template, None, Some(&out), None).unwrap();

        let plan = load_plan(&out).unwrap();
        let structured = plan.as_structured().unwrap();
        assert_eq!(structured.scripts.len(), 1);
        assert_eq!(structured.files.len(), 1);
        assert_eq!(structured.extra["Name"], "Deploy Tomcat");
    }

    #[test]
    fn test_sw014_compile_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let template = bundle(dir.path());
        std::fs::remove_file(dir.path().join("scripts/run.sh")).unwrap();
        let err = cmd_compile(&template, None, None, None).unwrap_err();
        assert!(err.contains("resource not found"));
    }

    #[test]
    fn test_sw014_args_from_plan() {
        let dir = tempfile::tempdir().unwrap();
        let template = bundle(dir.path());
        let out = dir.path().join("plan.json");
        cmd_compile(&template, Some(dir.path()), Some(&out), None).unwrap();
        cmd_args(&out).unwrap();

        let plan = load_plan(&out).unwrap();
        let args = args::plan_arguments(plan.as_structured().unwrap()).unwrap();
        assert_eq!(args, vec!["8080"]);
    }

    #[test]
    fn test_sw014_load_target_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.yaml");
        std::fs::write(
            &path,
            "host: 10.0.0.5\nport: 2222\nusername: ubuntu\nprivate_key:\n  path: ~/.ssh/id_ed25519\npublic_ips: [203.0.113.5]\n",
        )
        .unwrap();
        let t = load_target(&path).unwrap();
        assert_eq!(t.port, Some(2222));
        assert_eq!(t.username, "ubuntu");
        assert_eq!(t.address(), Some("203.0.113.5"));
    }

    #[test]
    fn test_sw014_run_legacy_plan_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path().join("plan.json");
        std::fs::write(&plan, r#"{"FormatVersion": "1.0.0", "Scripts": ["ZWNobyBoaQ=="]}"#).unwrap();
        let target = dir.path().join("target.yaml");
        std::fs::write(&target, "host: 10.0.0.5\npublic_key: ssh-ed25519 AAAA x\n").unwrap();

        let err = cmd_run(&plan, &target, None, 5, None, None).unwrap_err();
        assert!(err.contains("not implemented"));
    }

    #[test]
    fn test_sw014_run_with_agent_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let template = bundle(dir.path());
        let plan = dir.path().join("plan.json");
        cmd_compile(&template, None, Some(&plan), None).unwrap();
        let target = dir.path().join("target.yaml");
        std::fs::write(&target, "host: 10.0.0.5\npublic_key: ssh-ed25519 AAAA x\n").unwrap();
        let config = dir.path().join("engine.yaml");
        std::fs::write(&config, "executor:\n  disable_agent: true\n").unwrap();

        let err = cmd_run(&plan, &target, None, 5, Some(&config), None).unwrap_err();
        assert!(err.contains("disallowed"));
    }

    #[test]
    fn test_sw014_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("engine.yaml");
        std::fs::write(&config, "executor:\n  max_attempts: 0\n").unwrap();
        assert!(load_engine_config(Some(&config)).is_err());
        assert_eq!(load_engine_config(None).unwrap(), EngineConfig::default());
    }
}
