use foodgate::{
    camera::FaceCaptureController,
    common::{Config, DevMode},
    face::FaceAuthClient,
    session::{FileSessionStorage, SessionManager},
    storage::open_store,
    ApiClient, AuthError, AuthService, Authenticator, CapturedImage, LoginForm, Role, SignupForm,
};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "foodgate")]
#[command(about = "Foodgate account and face login client")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults to configs/foodgate.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Authenticate in-process against the configured store instead of the API
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
        /// customer or restaurant_owner
        #[arg(short, long, default_value = "customer")]
        role: String,
        /// Register a face from an image file
        #[arg(long, conflicts_with = "camera")]
        face_image: Option<PathBuf>,
        /// Register a face captured from the camera
        #[arg(long)]
        camera: bool,
    },
    /// Sign in with a password or a face
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(long, conflicts_with = "camera")]
        face_image: Option<PathBuf>,
        #[arg(long)]
        camera: bool,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami {
        /// Check the token with the server
        #[arg(long)]
        validate: bool,
    },
    /// Test camera and face detection
    TestCamera,
    /// Ask the support assistant
    Chat {
        #[arg(required = true)]
        message: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    match cli.command {
        Commands::Signup { name, email, password, role, face_image, camera } => {
            let role: Role = role.parse()?;
            let password = match password {
                Some(password) => password,
                None => prompt("Password: ")?,
            };
            let face_image = face_input(&config, &dev_mode, face_image.as_deref(), camera).await?;

            let manager = session_manager(cli.local, &config, &dev_mode)?;
            let session = manager
                .signup(SignupForm { name, email, password, role, face_image })
                .await?;
            println!("✅ Account created for {} ({})", session.email, session.role);
            if session.has_face_id {
                println!("   Face ID registered");
            }
        }
        Commands::Login { email, password, face_image, camera } => {
            let face_image = face_input(&config, &dev_mode, face_image.as_deref(), camera).await?;
            let password = match (&face_image, password) {
                (Some(_), _) => None,
                (None, Some(password)) => Some(password),
                (None, None) => Some(prompt("Password: ")?),
            };

            let manager = session_manager(cli.local, &config, &dev_mode)?;
            match manager.login(LoginForm { email, password, face_image }).await {
                Ok(session) => println!("✅ Signed in as {} ({})", session.display_name, session.email),
                Err(AuthError::VerificationFailed) => {
                    println!("❌ Face verification failed");
                    std::process::exit(1);
                }
                Err(AuthError::InvalidCredentials) => {
                    println!("❌ Invalid email or password");
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Logout => {
            let manager = session_manager(cli.local, &config, &dev_mode)?;
            manager.logout()?;
            println!("Signed out");
        }
        Commands::Whoami { validate } => {
            let manager = session_manager(cli.local, &config, &dev_mode)?;
            let mut session = manager.current();
            if validate && session.is_some() {
                session = match manager.validate().await {
                    Ok(session) => session,
                    Err(AuthError::SessionExpired(msg)) => {
                        println!("Session expired: {}", msg);
                        None
                    }
                    Err(e) => return Err(e.into()),
                };
            }
            match session {
                Some(session) => {
                    println!("{} <{}>", session.display_name, session.email);
                    println!("  id:      {}", session.user_id);
                    println!("  role:    {}", session.role);
                    println!("  face id: {}", if session.has_face_id { "yes" } else { "no" });
                }
                None => println!("Not signed in"),
            }
        }
        Commands::TestCamera => {
            println!("Testing camera...");
            test_camera(&config, &dev_mode).await?;
        }
        Commands::Chat { message } => {
            let client = ApiClient::new(&config.client.api_url)?;
            match client.chat(&message.join(" ")).await {
                Ok(reply) => println!("{}", reply),
                Err(AuthError::InvalidInput(msg)) => println!("{}", msg),
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

fn session_manager(local: bool, config: &Config, dev_mode: &DevMode) -> Result<SessionManager> {
    let auth: Arc<dyn Authenticator> = if local {
        let store = open_store(&config.storage, dev_mode)?;
        let face = FaceAuthClient::from_config(&config.face, dev_mode)?;
        Arc::new(AuthService::from_config(&config.auth, store, face))
    } else {
        Arc::new(ApiClient::new(&config.client.api_url)?)
    };

    let session_dir = config
        .client
        .session_dir
        .clone()
        .unwrap_or_else(|| dev_mode.session_dir());
    let storage = Arc::new(FileSessionStorage::new(session_dir)?);

    let manager = SessionManager::new(auth, storage);
    manager.restore()?;
    Ok(manager)
}

async fn face_input(
    config: &Config,
    dev_mode: &DevMode,
    path: Option<&Path>,
    camera: bool,
) -> Result<Option<CapturedImage>> {
    if let Some(path) = path {
        let img = image::open(path).with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(Some(CapturedImage::from_dynamic(&img)?));
    }
    if camera {
        return Ok(Some(capture_face(config, dev_mode).await?));
    }
    Ok(None)
}

/// The controller releases the camera on every path out of here, including
/// ctrl-c, when it is dropped.
async fn capture_face(config: &Config, dev_mode: &DevMode) -> Result<CapturedImage> {
    let face = FaceAuthClient::from_config(&config.face, dev_mode)?;
    let mut controller = FaceCaptureController::from_config(&config.camera, face);
    controller.start().await?;

    println!("Look at the camera...");
    let timeout = Duration::from_secs(u64::from(config.camera.face_wait_seconds));
    tokio::select! {
        image = controller.capture_when_detected(timeout) => match image {
            Ok(image) => Ok(image),
            Err(AuthError::NoFaceDetected) => {
                anyhow::bail!("No face detected within {} seconds", config.camera.face_wait_seconds)
            }
            Err(e) => Err(e.into()),
        },
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Cancelled"),
    }
}

async fn test_camera(config: &Config, dev_mode: &DevMode) -> Result<()> {
    let face = FaceAuthClient::from_config(&config.face, dev_mode)?;
    println!("Face backend: {}", face.backend_name());

    let mut controller = FaceCaptureController::from_config(&config.camera, face);
    controller.start().await?;
    println!("✅ Camera {} opened", config.camera.device_index);

    let mut detected = controller.subscribe();
    let wait = Duration::from_secs(u64::from(config.camera.face_wait_seconds));
    println!("Waiting up to {}s for a face...", config.camera.face_wait_seconds);
    let found = tokio::time::timeout(wait, detected.wait_for(|d| *d)).await.is_ok();
    if found {
        println!("✅ Face detected");
    } else {
        println!("⚠️  No face detected, capturing anyway");
    }

    let image = controller.capture().await?;
    let path = dev_mode.get_capture_path("test");
    std::fs::write(&path, image.bytes())?;
    let (width, height) = image.dimensions()?;
    println!("Saved {}x{} capture to {}", width, height, path.display());
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::stderr)
            .init();
    }
}
