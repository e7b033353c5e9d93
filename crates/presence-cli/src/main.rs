use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use presence_hw::{Camera, FrameSource};

#[derive(Parser)]
#[command(name = "presence", about = "Presence attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live attendance scan
    Start,
    /// Stop the live attendance scan
    Stop,
    /// Print the latest recognition results
    Results,
    /// Run an enrollment capture and save the employee
    Enroll {
        /// Employee code (e.g. E042)
        #[arg(short, long)]
        code: String,
        /// Full name
        #[arg(short, long)]
        name: String,
        /// Shift start time, HH:MM:SS
        #[arg(short, long)]
        shift: Option<String>,
        /// Joining date, YYYY-MM-DD
        #[arg(short, long)]
        joining: Option<String>,
    },
    /// Cancel a running enrollment capture
    Cancel,
    /// Manually mark attendance for an employee code
    Mark {
        /// Employee code
        code: String,
    },
    /// Reload the face gallery from the store
    Reload,
    /// Show daemon status
    Status,
    /// List available capture devices
    Devices,
    /// Capture one frame and save it as a PNG
    Test {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Output file
        #[arg(short, long, default_value = "presence-test.png")]
        output: String,
    },
}

#[zbus::proxy(
    interface = "org.presence.Attendance1",
    default_service = "org.presence.Attendance1",
    default_path = "/org/presence/Attendance1"
)]
trait Attendance {
    async fn start_scan(&self) -> zbus::Result<()>;
    async fn stop_scan(&self) -> zbus::Result<()>;
    async fn latest_results(&self) -> zbus::Result<String>;
    async fn begin_enrollment(&self) -> zbus::Result<()>;
    async fn cancel_enrollment(&self) -> zbus::Result<()>;
    async fn enrollment_progress(&self) -> zbus::Result<String>;
    async fn save_employee(&self, payload: &str) -> zbus::Result<String>;
    async fn manual_mark(&self, emp_code: &str) -> zbus::Result<String>;
    async fn reload_gallery(&self) -> zbus::Result<u64>;
    async fn pending_fallback(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

async fn proxy() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("is presenced running?")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            proxy().await?.start_scan().await?;
            println!("Scan started");
        }
        Commands::Stop => {
            proxy().await?.stop_scan().await?;
            println!("Scan stopped");
        }
        Commands::Results => {
            let raw = proxy().await?.latest_results().await?;
            print_results(&raw)?;
        }
        Commands::Enroll {
            code,
            name,
            shift,
            joining,
        } => {
            run_enrollment(&code, &name, shift.as_deref(), joining.as_deref()).await?;
        }
        Commands::Cancel => {
            proxy().await?.cancel_enrollment().await?;
            println!("Enrollment cancelled");
        }
        Commands::Mark { code } => {
            let message = proxy().await?.manual_mark(&code).await?;
            println!("{message}");
        }
        Commands::Reload => {
            let count = proxy().await?.reload_gallery().await?;
            println!("Gallery reloaded: {count} templates");
        }
        Commands::Status => {
            let raw = proxy().await?.status().await?;
            let status: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for (path, card) in devices {
                println!("{path}  {card}");
            }
        }
        Commands::Test { device, output } => {
            run_camera_test(&device, &output)?;
        }
    }

    Ok(())
}

fn print_results(raw: &str) -> Result<()> {
    let results: serde_json::Value = serde_json::from_str(raw)?;
    let Some(list) = results.as_array() else {
        bail!("unexpected results payload: {raw}");
    };
    if list.is_empty() {
        println!("No faces in the latest cycle");
        return Ok(());
    }
    for item in list {
        let status = item["status"].as_str().unwrap_or("?");
        let identity = item["identity"].as_str().unwrap_or("-");
        let name = item["display_name"].as_str().unwrap_or("");
        println!("{status:16} {identity:8} {name}");
    }
    Ok(())
}

/// Drive the pose-guided capture to completion, then save the employee.
async fn run_enrollment(
    code: &str,
    name: &str,
    shift: Option<&str>,
    joining: Option<&str>,
) -> Result<()> {
    let proxy = proxy().await?;
    proxy.begin_enrollment().await?;
    println!("Follow the pose prompts: 3x front, 1x left, 1x right");

    let mut last = (String::new(), 0u64);
    let mut seen_active = false;
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        let raw = proxy.enrollment_progress().await?;
        let progress: serde_json::Value = serde_json::from_str(&raw)?;

        let state = progress["state"].as_str().unwrap_or("?").to_string();
        let samples = progress["samples"].as_u64().unwrap_or(0);
        let required = progress["required"].as_u64().unwrap_or(5);

        if state == "IDLE" {
            // The worker resets progress to IDLE when a capture is
            // cancelled; before the first active state it just has not
            // picked the session up yet.
            if seen_active {
                bail!("enrollment was cancelled");
            }
            continue;
        }
        seen_active = true;

        if (state.clone(), samples) != last {
            match state.as_str() {
                "FRONT" => println!("[{samples}/{required}] Look straight ahead"),
                "LEFT" => println!("[{samples}/{required}] Turn your head left"),
                "RIGHT" => println!("[{samples}/{required}] Turn your head right"),
                "DONE" => println!("[{samples}/{required}] Capture complete"),
                other => println!("[{samples}/{required}] {other}"),
            }
            last = (state, samples);
        }

        if last.0 == "DONE" {
            break;
        }
    }

    let payload = serde_json::json!({
        "code": code,
        "full_name": name,
        "shift_start": shift,
        "joining_date": joining,
    });
    let message = proxy.save_employee(&payload.to_string()).await?;
    println!("{message}");
    Ok(())
}

/// Direct camera diagnostic, bypassing the daemon.
fn run_camera_test(device: &str, output: &str) -> Result<()> {
    let mut camera = Camera::open(device).with_context(|| format!("opening {device}"))?;
    let frame = camera.read_frame().context("reading a frame")?;

    let img = image::RgbImage::from_raw(frame.width, frame.height, frame.data)
        .context("frame buffer did not match its dimensions")?;
    img.save(output).with_context(|| format!("writing {output}"))?;

    println!(
        "Captured {}x{} frame from {device} -> {output}",
        frame.width, frame.height
    );
    Ok(())
}
