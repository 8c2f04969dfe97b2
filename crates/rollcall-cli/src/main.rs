use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

// `#[zbus::proxy]` generates the async `AttendanceProxy`.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn login_teacher(&self, username: &str, password: &str) -> zbus::Result<()>;
    async fn login_student(
        &self,
        classroom_id: &str,
        roll_id: &str,
        secret: &str,
    ) -> zbus::Result<()>;
    async fn logout(&self) -> zbus::Result<()>;
    async fn whoami(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;

    async fn list_classrooms(&self) -> zbus::Result<String>;
    async fn get_classroom(&self, classroom_id: &str) -> zbus::Result<String>;
    async fn create_classroom(&self, name: &str) -> zbus::Result<String>;
    async fn rename_classroom(&self, classroom_id: &str, name: &str) -> zbus::Result<()>;
    async fn delete_classroom(&self, classroom_id: &str) -> zbus::Result<u32>;

    async fn add_student(
        &self,
        classroom_id: &str,
        name: &str,
        roll_id: &str,
        secret: &str,
        photo_mime_type: &str,
        photo_data: &[u8],
    ) -> zbus::Result<String>;
    async fn update_student(
        &self,
        student_id: &str,
        name: &str,
        roll_id: &str,
        new_secret: &str,
    ) -> zbus::Result<String>;
    async fn remove_student(&self, student_id: &str) -> zbus::Result<()>;

    async fn generate_report(
        &self,
        classroom_id: &str,
        period: &str,
        image_mime_type: &str,
        image_data: &[u8],
    ) -> zbus::Result<String>;
    async fn list_reports(&self, classroom_id: &str) -> zbus::Result<String>;
    async fn get_report(&self, report_id: &str) -> zbus::Result<String>;
    async fn toggle_status(&self, report_id: &str, student_id: &str) -> zbus::Result<bool>;
    async fn identify_face(&self, report_id: &str, face_id: &str) -> zbus::Result<String>;
    async fn resolve_face(&self, report_id: &str, face_id: &str, name: &str) -> zbus::Result<bool>;
    async fn export_csv(&self, report_id: &str) -> zbus::Result<String>;

    async fn my_attendance(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in as the teacher or as a student
    Login {
        #[command(subcommand)]
        who: LoginCommand,
    },
    /// End the current session
    Logout,
    /// Show who is logged in
    Whoami,
    /// Show daemon status
    Status,
    /// Manage classrooms
    Classroom {
        #[command(subcommand)]
        command: ClassroomCommand,
    },
    /// Manage enrolled students
    Student {
        #[command(subcommand)]
        command: StudentCommand,
    },
    /// Generate, review and correct attendance reports
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
    /// Show your own attendance (student login)
    Me,
}

#[derive(Subcommand)]
enum LoginCommand {
    Teacher {
        #[arg(short, long, default_value = "teacher")]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    Student {
        /// Classroom ID
        #[arg(short, long)]
        classroom: String,
        /// Roll / library number
        #[arg(short, long)]
        roll: String,
        #[arg(short, long)]
        secret: String,
    },
}

#[derive(Subcommand)]
enum ClassroomCommand {
    Create { name: String },
    Rename { id: String, name: String },
    /// Delete a classroom, its students and all of its reports
    Delete { id: String },
    List,
    Show { id: String },
}

#[derive(Subcommand)]
enum StudentCommand {
    /// Enroll a student with a reference photo
    Add {
        #[arg(short, long)]
        classroom: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        roll: String,
        #[arg(short, long)]
        secret: String,
        /// Reference photo (JPEG, PNG, WebP, ...)
        #[arg(short, long)]
        photo: PathBuf,
    },
    Update {
        id: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        roll: String,
        /// New login secret; omit to keep the current one
        #[arg(short, long)]
        secret: Option<String>,
    },
    Remove { id: String },
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Take attendance from a classroom photo
    Generate {
        #[arg(short, long)]
        classroom: String,
        #[arg(short, long, default_value = "")]
        period: String,
        image: PathBuf,
    },
    List {
        /// Only reports of this classroom
        #[arg(short, long)]
        classroom: Option<String>,
    },
    Show { id: String },
    /// Flip a student between Present and Absent
    Toggle { id: String, student: String },
    /// Ask the recognition service who a detected face is
    Identify { id: String, face: String },
    /// Confirm who an unknown face is
    Resolve { id: String, face: String, name: String },
    /// Write the report as CSV
    Export {
        id: String,
        /// Output directory (default: current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Login { .. } => "login",
            Commands::Logout => "logout",
            Commands::Whoami => "whoami",
            Commands::Status => "status",
            Commands::Classroom { .. } => "classroom",
            Commands::Student { .. } => "student",
            Commands::Report { .. } => "report",
            Commands::Me => "me",
        }
    }
}

/// Mime type from the file extension.
fn mime_type_for(path: &Path) -> Result<&'static str> {
    let format = image::ImageFormat::from_path(path)
        .with_context(|| format!("unrecognized image type: {}", path.display()))?;
    Ok(format.to_mime_type())
}

fn read_image(path: &Path) -> Result<(&'static str, Vec<u8>)> {
    let mime = mime_type_for(path)?;
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(path = %path.display(), mime, bytes = data.len(), "image read");
    Ok((mime, data))
}

fn print_json(raw: &str) -> Result<()> {
    let value: Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn print_report(raw: &str) -> Result<()> {
    let report: Value = serde_json::from_str(raw)?;
    println!(
        "{}  {}  {}  ({})",
        text(&report, "timestamp"),
        text(&report, "classroom_name"),
        text(&report, "period"),
        text(&report, "id")
    );
    println!("present {}  absent {}", report["present"], report["absent"]);
    println!();
    for record in report["attendance"].as_array().into_iter().flatten() {
        println!(
            "  {:<8} {:<28} {:<8} {}",
            text(record, "roll_id"),
            text(record, "name"),
            text(record, "status"),
            text(record, "student_id")
        );
    }
    let faces = report["detected_faces"].as_array().cloned().unwrap_or_default();
    if !faces.is_empty() {
        println!();
        println!("faces:");
        for face in &faces {
            println!("  {:<28} {}", text(face, "name"), text(face, "id"));
        }
    }
    let summary = text(&report, "engagement_summary");
    if !summary.is_empty() {
        println!();
        println!("{summary}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = AttendanceProxy::new(&connection)
        .await
        .context("rollcalld is not running")?;
    tracing::debug!(command = cli.command.name(), "connected to rollcalld");

    match cli.command {
        Commands::Login { who } => match who {
            LoginCommand::Teacher { username, password } => {
                proxy.login_teacher(&username, &password).await?;
                println!("Logged in as teacher");
            }
            LoginCommand::Student {
                classroom,
                roll,
                secret,
            } => {
                proxy.login_student(&classroom, &roll, &secret).await?;
                println!("Logged in as student {roll}");
            }
        },
        Commands::Logout => {
            proxy.logout().await?;
            println!("Logged out");
        }
        Commands::Whoami => print_json(&proxy.whoami().await?)?,
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Classroom { command } => match command {
            ClassroomCommand::Create { name } => {
                let id = proxy.create_classroom(&name).await?;
                println!("{id}");
            }
            ClassroomCommand::Rename { id, name } => {
                proxy.rename_classroom(&id, &name).await?;
                println!("Renamed {id}");
            }
            ClassroomCommand::Delete { id } => {
                let reports = proxy.delete_classroom(&id).await?;
                println!("Deleted {id} and {reports} report(s)");
            }
            ClassroomCommand::List => print_json(&proxy.list_classrooms().await?)?,
            ClassroomCommand::Show { id } => print_json(&proxy.get_classroom(&id).await?)?,
        },
        Commands::Student { command } => match command {
            StudentCommand::Add {
                classroom,
                name,
                roll,
                secret,
                photo,
            } => {
                let (mime, data) = read_image(&photo)?;
                let id = proxy
                    .add_student(&classroom, &name, &roll, &secret, mime, &data)
                    .await?;
                println!("{id}");
            }
            StudentCommand::Update {
                id,
                name,
                roll,
                secret,
            } => {
                let student = proxy
                    .update_student(&id, &name, &roll, secret.as_deref().unwrap_or(""))
                    .await?;
                print_json(&student)?;
            }
            StudentCommand::Remove { id } => {
                proxy.remove_student(&id).await?;
                println!("Removed {id}");
            }
        },
        Commands::Report { command } => match command {
            ReportCommand::Generate {
                classroom,
                period,
                image,
            } => {
                let (mime, data) = read_image(&image)?;
                println!("Sending {} to the recognition service...", image.display());
                print_report(&proxy.generate_report(&classroom, &period, mime, &data).await?)?;
            }
            ReportCommand::List { classroom } => {
                print_json(&proxy.list_reports(classroom.as_deref().unwrap_or("")).await?)?
            }
            ReportCommand::Show { id } => print_report(&proxy.get_report(&id).await?)?,
            ReportCommand::Toggle { id, student } => {
                if proxy.toggle_status(&id, &student).await? {
                    println!("Toggled {student}");
                } else {
                    println!("No such report or student");
                }
            }
            ReportCommand::Identify { id, face } => {
                println!("{}", proxy.identify_face(&id, &face).await?);
            }
            ReportCommand::Resolve { id, face, name } => {
                if proxy.resolve_face(&id, &face, &name).await? {
                    println!("{name} marked present");
                } else {
                    println!("No student named {name:?} in this report; nothing changed");
                }
            }
            ReportCommand::Export { id, out } => {
                let export: Value = serde_json::from_str(&proxy.export_csv(&id).await?)?;
                let path = out
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(text(&export, "filename"));
                std::fs::write(&path, text(&export, "csv"))
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {}", path.display());
            }
        },
        Commands::Me => {
            let records: Value = serde_json::from_str(&proxy.my_attendance().await?)?;
            let records = records.as_array().cloned().unwrap_or_default();
            if records.is_empty() {
                println!("No attendance recorded yet");
            }
            for record in &records {
                println!(
                    "{}  {:<20} {:<12} {}",
                    text(record, "timestamp"),
                    text(record, "classroom_name"),
                    text(record, "period"),
                    text(record, "status")
                );
            }
        }
    }

    Ok(())
}
