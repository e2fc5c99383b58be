use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use client_core::{
    AdminData, AdminResource, BackendApi, BookingClient, BookingPhase, HttpBackend,
    PaymentOutcome, StepOutcome,
};
use shared::domain::{AdventureId, Booking, BookingId};
use storage::{Storage, COOKIE_CACHE_KEY};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(name = "booking", about = "Adventure booking client")]
struct Cli {
    /// Overrides the configured backend base URL.
    #[arg(long)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with a username or an email address.
    Login {
        identifier: String,
        #[arg(long)]
        password: String,
    },
    Signup {
        username: String,
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },
    Logout,
    /// Reconcile the cached session with the server and print it.
    Whoami,
    #[command(subcommand)]
    Admin(AdminCommand),
    /// List adventures, or show one.
    Adventures { id: Option<i64> },
    /// Book an adventure and pay for it with a mobile-money prompt.
    Book {
        #[arg(long)]
        adventure: i64,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value_t = 1)]
        guests: u32,
        /// Phone number that receives the payment prompt.
        #[arg(long)]
        pay_with: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long, default_value = "")]
        requests: String,
    },
    MyBookings,
    Cancel { booking_id: i64 },
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    Dashboard,
    Users,
    Bookings,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings()?;
    if let Some(api_url) = cli.api_url {
        settings.api_base_url = api_url;
    }
    debug!(?settings, "loaded settings");

    let storage = Storage::new(&settings.cache_database_url)
        .await
        .with_context(|| format!("failed to open cache at {}", settings.cache_database_url))?;
    let api = Arc::new(HttpBackend::new(
        &settings.api_base_url,
        settings.request_timeout(),
    )?);
    if let Some(cookies) = storage.load_entry(COOKIE_CACHE_KEY).await? {
        api.restore_cookies(&cookies);
    }

    let client = BookingClient::new(
        api.clone(),
        Arc::new(storage.clone()),
        settings.payment_polling(),
    );
    let result = run(cli.command, &client, api.as_ref()).await;

    persist_cookies(&storage, &api, client.session.is_authenticated()).await;
    result
}

async fn run(command: Command, client: &BookingClient, api: &HttpBackend) -> Result<()> {
    match command {
        Command::Login {
            identifier,
            password,
        } => {
            let outcome = client.session.login(&identifier, &password).await?;
            println!(
                "signed in as {} (user_id={}); continue at {}",
                outcome.session.display_name, outcome.session.user_id, outcome.redirect
            );
        }
        Command::Signup {
            username,
            email,
            password,
            confirm,
        } => {
            let outcome = client
                .session
                .signup(&username, &email, &password, &confirm)
                .await?;
            println!(
                "account created for {} (user_id={})",
                outcome.session.display_name, outcome.session.user_id
            );
        }
        Command::Logout => {
            client.session.logout().await;
            println!("signed out");
        }
        Command::Whoami => {
            let outcome = client.session.reconcile().await;
            match client.session.current() {
                Some(session) if outcome.authenticated => println!(
                    "{} <{}> user_id={} admin={}",
                    session.display_name, session.email, session.user_id, outcome.is_admin
                ),
                _ => println!("not signed in"),
            }
        }
        Command::Admin(command) => {
            client.session.reconcile().await;
            let resource = match command {
                AdminCommand::Dashboard => AdminResource::Dashboard,
                AdminCommand::Users => AdminResource::Users,
                AdminCommand::Bookings => AdminResource::Bookings,
            };
            let Some(data) = client.session.fetch_privileged(resource).await else {
                bail!("admin data unavailable; sign in with an admin account");
            };
            print_admin_data(&data)?;
        }
        Command::Adventures { id: Some(id) } => {
            let adventure = api.adventure(AdventureId(id)).await?;
            println!("{}", serde_json::to_string_pretty(&adventure)?);
        }
        Command::Adventures { id: None } => {
            for adventure in api.list_adventures().await? {
                println!(
                    "{:>4}  {:<40} {:<20} KES {:.0}",
                    adventure.id.0, adventure.title, adventure.location, adventure.price
                );
            }
        }
        Command::Book {
            adventure,
            date,
            guests,
            pay_with,
            name,
            email,
            phone,
            requests,
        } => {
            client.session.reconcile().await;
            let adventure = api.adventure(AdventureId(adventure)).await?;
            let unit_price = adventure
                .unit_price()
                .ok_or_else(|| anyhow!("adventure {} has no usable price", adventure.id))?;
            let observer = |outcome: PaymentOutcome, booking_id: BookingId| {
                debug!(%booking_id, ?outcome, "booking completed");
            };
            let flow = client.desk.open(adventure.id, unit_price, Arc::new(observer));
            flow.edit_draft(|draft| {
                draft.trip_date = Some(date);
                draft.guest_count = guests;
                draft.special_requests = requests;
                if let Some(name) = name {
                    draft.customer_name = name;
                }
                if let Some(email) = email {
                    draft.customer_email = email;
                }
                if let Some(phone) = phone {
                    draft.customer_phone = phone;
                }
            })
            .await;

            let booking = match flow.submit().await {
                StepOutcome::Advanced(BookingPhase::AwaitingPayment { booking, .. }) => booking,
                other => return Err(step_failure("booking", other)),
            };
            println!(
                "booking {} created, total KES {}; sending payment prompt to {pay_with}",
                booking.booking_id, booking.total_amount
            );

            match flow.initiate_payment(&pay_with).await {
                StepOutcome::Advanced(BookingPhase::Settled { outcome, .. }) => match outcome {
                    PaymentOutcome::Confirmed => println!("payment confirmed"),
                    PaymentOutcome::Failed => println!("payment failed; the booking was not paid"),
                    PaymentOutcome::Unknown => println!(
                        "payment not confirmed yet; check `booking my-bookings` later"
                    ),
                },
                other => return Err(step_failure("payment", other)),
            }
        }
        Command::MyBookings => {
            for booking in api.my_bookings().await? {
                print_booking(&booking);
            }
        }
        Command::Cancel { booking_id } => {
            let booking = api.cancel_booking(BookingId(booking_id)).await?;
            print_booking(&booking);
        }
    }
    Ok(())
}

fn step_failure(step: &str, outcome: StepOutcome) -> anyhow::Error {
    match outcome {
        StepOutcome::Rejected {
            error,
            redirect: Some(route),
        } => anyhow!("{step} failed: {error} (sign in again; the app would go to {route})"),
        StepOutcome::Rejected { error, .. } => anyhow!("{step} failed: {error}"),
        other => anyhow!("{step} did not advance: {other:?}"),
    }
}

fn print_booking(booking: &Booking) {
    println!(
        "{:>5}  {:<10} {:<12} {:>3} guest(s)  KES {:.0}  {}",
        booking.booking_id.0,
        booking.status.as_str(),
        booking.adventure_date.as_deref().unwrap_or("-"),
        booking.number_of_people.unwrap_or_default(),
        booking.total_amount,
        booking.booking_reference.as_deref().unwrap_or(""),
    );
}

fn print_admin_data(data: &AdminData) -> Result<()> {
    match data {
        AdminData::Dashboard(report) => println!("{}", serde_json::to_string_pretty(report)?),
        AdminData::Users(users) => {
            for user in users {
                println!(
                    "{:>4}  {:<20} {:<30} admin={}",
                    user.id.0, user.username, user.email, user.is_admin
                );
            }
        }
        AdminData::Bookings(bookings) => bookings.iter().for_each(print_booking),
    }
    Ok(())
}

/// Keeps the backend session cookie across invocations while signed in.
async fn persist_cookies(storage: &Storage, api: &HttpBackend, signed_in: bool) {
    let result = match api.cookie_header().filter(|_| signed_in) {
        Some(header) => storage.store_entry(COOKIE_CACHE_KEY, &header).await,
        None => storage.remove_entry(COOKIE_CACHE_KEY).await.map(|_| ()),
    };
    if let Err(error) = result {
        warn!(%error, "failed to persist session cookie");
    }
}
