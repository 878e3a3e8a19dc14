use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        logging: LoggingOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_describe_a_local_engrafo_deployment() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.renderer.image, DEFAULT_RENDERER_IMAGE);
    assert_eq!(settings.renderer.command, DEFAULT_RENDERER_COMMAND);
    assert_eq!(settings.jobs.max_attempts.get(), DEFAULT_JOB_MAX_ATTEMPTS);
    assert_eq!(
        settings.dispatch.claim_lease,
        Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS)
    );
    assert_eq!(settings.storage.media_url, "/media/");
    match &settings.storage.mode {
        StorageMode::Local { media_root } => {
            assert!(media_root.is_absolute());
            assert!(media_root.ends_with(DEFAULT_MEDIA_ROOT));
        }
        other => panic!("expected local storage, got {other:?}"),
    }
    assert!(matches!(
        settings.storage.execution_profile(),
        ExecutionProfile::Local { .. }
    ));
}

#[test]
fn remote_storage_requires_credentials() {
    let mut raw = RawSettings::default();
    raw.storage.remote = Some(true);
    raw.storage.bucket = Some("renders".into());
    raw.storage.region = Some("us-east-1".into());
    raw.storage.access_key_id = Some("AKIA".into());

    let err = Settings::from_raw(raw).expect_err("secret is missing");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "storage.secret_access_key",
            ..
        }
    ));
}

#[test]
fn remote_storage_derives_bucket_media_url_and_profile() {
    let mut raw = RawSettings::default();
    raw.storage.remote = Some(true);
    raw.storage.bucket = Some("renders".into());
    raw.storage.region = Some("us-east-1".into());
    raw.storage.access_key_id = Some("AKIA".into());
    raw.storage.secret_access_key = Some("s3cr3t".into());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.storage.media_url,
        "https://renders.s3.amazonaws.com/"
    );
    assert!(!format!("{:?}", settings.storage).contains("s3cr3t"));

    let profile = settings.storage.execution_profile();
    assert_eq!(
        profile.output_target("render-output/abc"),
        "s3://renders/render-output/abc"
    );
    assert_eq!(settings.storage.output_layout().media_root(), None);
}

#[test]
fn source_templates_must_carry_the_placeholder() {
    let mut raw = RawSettings::default();
    raw.sources.submission_url_format = Some("http://files.internal/upload".into());

    let err = Settings::from_raw(raw).expect_err("placeholder missing");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "sources.submission_url_format",
            ..
        }
    ));
}

#[test]
fn zero_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    raw.jobs.render_concurrency = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        logging: LoggingOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["vellum"]);
    assert!(args.command.is_none());
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "vellum",
        "serve",
        "--server-port",
        "9000",
        "--renderer-image",
        "registry.local/engrafo:2",
        "--storage-remote",
        "false",
        "--jobs-max-attempts",
        "5",
    ]);

    match args.command {
        Some(Command::Serve(serve)) => {
            assert_eq!(serve.overrides.server_port, Some(9000));
            assert_eq!(
                serve.overrides.renderer.renderer_image.as_deref(),
                Some("registry.local/engrafo:2")
            );
            assert_eq!(serve.overrides.storage.storage_remote, Some(false));
            assert_eq!(serve.overrides.jobs.jobs_max_attempts, Some(5));
        }
        other => panic!("expected serve command, got {other:?}"),
    }
}

#[test]
fn parse_execute_arguments() {
    let args = CliArgs::parse_from([
        "vellum",
        "execute",
        "--source-type",
        "arxiv",
        "--source-id",
        "1707.08219",
        "--storage-media-root",
        "/srv/media",
    ]);

    match args.command {
        Some(Command::Execute(execute)) => {
            assert_eq!(execute.source_type, "arxiv");
            assert_eq!(execute.source_id, "1707.08219");
            assert_eq!(
                execute.storage.storage_media_root,
                Some(PathBuf::from("/srv/media"))
            );
        }
        other => panic!("expected execute command, got {other:?}"),
    }
}

#[test]
fn worker_overrides_apply_to_jobs_and_database() {
    let args = CliArgs::parse_from([
        "vellum",
        "worker",
        "--database-url",
        "postgres://localhost/vellum",
        "--jobs-render-concurrency",
        "6",
    ]);

    let mut raw = RawSettings::default();
    raw.apply_command_overrides(args.command.as_ref());
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(
        settings.database.url.as_deref(),
        Some("postgres://localhost/vellum")
    );
    assert_eq!(settings.jobs.render_concurrency.get(), 6);
}
