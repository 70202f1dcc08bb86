use std::sync::Arc;

use crate::db::queries;
use crate::models::{
    Actor, ActorLookup, Booking, BookingStatus, InboundMessage, Reply, Role, Service, ServiceKind, Session,
    SessionState,
};
use crate::services::dispatch::{self, DispatchOutcome};
use crate::services::ledger::{self, CancelOutcome};
use crate::services::payments::upi;
use crate::services::{directory, handshake, settlement};
use crate::state::AppState;

const WELCOME: &str = "Welcome to Mechanic Booking, how can I help you?\n\n1. Register as a mechanic\n2. Get a service";
const MENU_REPROMPT: &str = "Please select one of the options:\n\n1. Register as a mechanic\n2. Get a service";
const START_OVER: &str = "Hi! To start over, please type \"hi\"";
const ASK_NAME: &str = "What is your name?";
const ASK_LOCATION_PIN: &str = "Please share your location using WhatsApp's location feature.";
const WAIT_FOR_PAYMENT: &str = "Please wait for customer payment confirmation.";

/// Outcome of one menu step: either the session lives on, or it ends.
struct Turn {
    reply: Reply,
    end: bool,
}

impl Turn {
    fn next(reply: impl Into<String>) -> Self {
        Self {
            reply: Reply::text(reply),
            end: false,
        }
    }

    fn end(reply: impl Into<String>) -> Self {
        Self {
            reply: Reply::text(reply),
            end: true,
        }
    }
}

/// Handles one inbound event and returns the reply for its sender.
///
/// Events from the same identity are processed one at a time; the session
/// gate is held until the reply is decided.
pub async fn process_message(state: &Arc<AppState>, msg: &InboundMessage) -> anyhow::Result<Reply> {
    let mut guard = state.sessions.acquire(&msg.from).await;

    let (lookup, active) = {
        let db = state.db();
        let lookup = directory::lookup(&db, &msg.from)?;
        let active = ledger::active_booking(&db, &lookup)?;
        (lookup, active)
    };

    let session = guard.get().cloned();
    tracing::info!(
        phone = %msg.from,
        role = lookup.actor().map(|a| a.role.as_str()).unwrap_or("unknown"),
        state = session.as_ref().map(|s| s.state.as_str()).unwrap_or("none"),
        has_location = msg.location.is_some(),
        "processing message"
    );

    if let Some(booking) = active {
        let (reply, end) = route_active_booking(state, msg, &lookup, booking).await?;
        if end {
            guard.clear();
        } else if let Some(session) = session {
            guard.save(session);
        }
        return Ok(reply);
    }

    let idle = session.as_ref().map(|s| s.state.accepts_greeting()).unwrap_or(true);
    if let (ActorLookup::Provider(provider), true) = (&lookup, idle) {
        if let Some(accept) = dispatch::parse_offer_reply(&msg.body) {
            let has_offer = {
                let db = state.db();
                dispatch::has_offer(&db, &provider.id)?
            };
            if has_offer {
                let outcome = dispatch::respond(state, provider, accept).await?;
                if let Some(session) = session {
                    guard.save(session);
                }
                return Ok(Reply::text(outcome.reply()));
            }
        }
    }

    let mut session = session.unwrap_or_else(|| Session::new(&msg.from));
    let turn = advance(state, msg, &lookup, &mut session).await?;
    if turn.end {
        guard.clear();
    } else {
        guard.save(session);
    }
    Ok(turn.reply)
}

/// Routing for a sender with a non-terminal booking. Returns the reply and
/// whether the sender's session ends.
async fn route_active_booking(
    state: &Arc<AppState>,
    msg: &InboundMessage,
    lookup: &ActorLookup,
    booking: Booking,
) -> anyhow::Result<(Reply, bool)> {
    let text = msg.normalized();

    match lookup {
        ActorLookup::Provider(provider) => {
            let reply = match booking.status {
                BookingStatus::Accepted => match dispatch::parse_offer_reply(&text) {
                    Some(true) => dispatch::respond(state, provider, true).await?.reply().to_string(),
                    _ => WAIT_FOR_PAYMENT.to_string(),
                },
                BookingStatus::PaymentPending => WAIT_FOR_PAYMENT.to_string(),
                BookingStatus::InProgress if handshake::is_arrival_keyword(&text) => {
                    handshake::confirm_arrival(state, &booking.id, Role::Provider)
                        .await?
                        .reply(Role::Provider)
                }
                BookingStatus::InProgress if booking.otp.is_some() => {
                    settlement::submit_code(state, provider, &booking.id, &msg.body)
                        .await?
                        .reply()
                }
                BookingStatus::InProgress => {
                    "Please confirm when you reach the customer's location by replying \"I reached\"".to_string()
                }
                BookingStatus::Pending | BookingStatus::Completed | BookingStatus::Cancelled => {
                    "No active booking found.".to_string()
                }
            };
            Ok((Reply::text(reply), false))
        }
        ActorLookup::Requester(_) => {
            if text == "cancel" {
                return match ledger::cancel_by_requester(state, &booking).await? {
                    CancelOutcome::Cancelled { .. } => Ok((
                        Reply::text("Your booking has been cancelled. Type \"hi\" whenever you need help again."),
                        true,
                    )),
                    CancelOutcome::NotCancellable(BookingStatus::PaymentPending) => Ok((
                        Reply::text(
                            "Your booking can no longer be cancelled because the payment link has already been sent.",
                        ),
                        false,
                    )),
                    CancelOutcome::NotCancellable(_) => Ok((
                        Reply::text("Your booking can no longer be cancelled because the mechanic is on the way."),
                        false,
                    )),
                };
            }

            let reply = match booking.status {
                BookingStatus::InProgress if handshake::is_arrival_keyword(&text) => Reply::text(
                    handshake::confirm_arrival(state, &booking.id, Role::Requester)
                        .await?
                        .reply(Role::Requester),
                ),
                BookingStatus::Pending => Reply::text(
                    "We are looking for mechanics in your area. Please wait for confirmation. Reply \"cancel\" to cancel the request.",
                ),
                BookingStatus::Accepted => {
                    Reply::text("A mechanic has accepted your request. Your payment link will arrive shortly.")
                }
                BookingStatus::PaymentPending => match &booking.payment_link {
                    Some(link) => Reply {
                        body: format!("Please complete the payment of ₹{} to proceed: {}", booking.price, link),
                        media_url: upi::qr_image_url(link),
                    },
                    None => Reply::text("Your payment link will arrive shortly."),
                },
                BookingStatus::InProgress if booking.otp.is_some() => {
                    Reply::text("Please share your OTP with the mechanic once the service is completed.")
                }
                BookingStatus::InProgress => {
                    Reply::text("Please confirm when the mechanic arrives by replying \"Reached\".")
                }
                BookingStatus::Completed | BookingStatus::Cancelled => Reply::text(START_OVER),
            };
            Ok((reply, false))
        }
        ActorLookup::Unknown => Ok((Reply::text(START_OVER), false)),
    }
}

/// The registration / service-request menu.
async fn advance(
    state: &Arc<AppState>,
    msg: &InboundMessage,
    lookup: &ActorLookup,
    session: &mut Session,
) -> anyhow::Result<Turn> {
    let text = msg.normalized();

    match session.state {
        SessionState::None | SessionState::Done | SessionState::AwaitingProvider => {
            if msg.location.is_none() && matches!(text.as_str(), "hi" | "hello") {
                session.reset();
                session.state = SessionState::Greeted;
                Ok(Turn::next(WELCOME))
            } else {
                Ok(Turn::next(START_OVER))
            }
        }

        SessionState::Greeted => match text.as_str() {
            "1" | "register as a mechanic" => match lookup {
                ActorLookup::Unknown => {
                    session.data.role = Some(Role::Provider);
                    session.state = SessionState::ProviderName;
                    Ok(Turn::next(ASK_NAME))
                }
                ActorLookup::Provider(_) => Ok(Turn::end(
                    "You are already registered as a mechanic. You will be notified when customers nearby need your services.",
                )),
                ActorLookup::Requester(_) => Ok(Turn::end(
                    "This number is already registered as a customer. Type \"hi\" and choose \"Get a service\" to request help.",
                )),
            },
            "2" | "get a service" => match lookup {
                ActorLookup::Requester(actor) => {
                    session.data.role = Some(Role::Requester);
                    session.data.requester_id = Some(actor.id.clone());
                    session.data.name = Some(actor.name.clone());
                    session.state = SessionState::ServiceSelect;
                    Ok(Turn::next(service_menu(state)?))
                }
                ActorLookup::Provider(_) => Ok(Turn::end(
                    "This number is registered as a mechanic. You will be notified when customers nearby need your services.",
                )),
                ActorLookup::Unknown => {
                    session.data.role = Some(Role::Requester);
                    session.state = SessionState::RequesterName;
                    Ok(Turn::next(ASK_NAME))
                }
            },
            _ => Ok(Turn::next(MENU_REPROMPT)),
        },

        SessionState::ProviderName => {
            if msg.body.is_empty() {
                return Ok(Turn::next(ASK_NAME));
            }
            session.data.name = Some(msg.body.clone());
            session.state = SessionState::ProviderLocation;
            Ok(Turn::next("Please share your current location."))
        }

        SessionState::ProviderLocation => match msg.location {
            Some(point) => {
                session.data.location = Some(point);
                session.state = SessionState::ProviderPayout;
                Ok(Turn::next("What is your UPI ID?"))
            }
            None => Ok(Turn::next(ASK_LOCATION_PIN)),
        },

        SessionState::ProviderPayout => {
            if msg.body.is_empty() {
                return Ok(Turn::next("What is your UPI ID?"));
            }
            let (Some(name), Some(location)) = (session.data.name.clone(), session.data.location) else {
                return Ok(Turn::end("There was an error completing your registration. Please try again."));
            };
            let registered = {
                let db = state.db();
                directory::register_provider(&db, &msg.from, &name, location, &msg.body)
            };
            match registered {
                Ok(_) => {
                    session.reset();
                    session.state = SessionState::Done;
                    Ok(Turn::next(
                        "Registration complete! You will be notified when customers nearby need your services.",
                    ))
                }
                Err(e) => {
                    tracing::warn!(error = %e, phone = %msg.from, "provider registration failed");
                    Ok(Turn::end("There was an error completing your registration. Please try again."))
                }
            }
        }

        SessionState::RequesterName => {
            if msg.body.is_empty() {
                return Ok(Turn::next(ASK_NAME));
            }
            let registered = {
                let db = state.db();
                directory::register_requester(&db, &msg.from, &msg.body)
            };
            match registered {
                Ok(actor) => {
                    session.data.name = Some(actor.name);
                    session.data.requester_id = Some(actor.id);
                    session.state = SessionState::ServiceSelect;
                    Ok(Turn::next(service_menu(state)?))
                }
                Err(e) => {
                    tracing::warn!(error = %e, phone = %msg.from, "requester registration failed");
                    Ok(Turn::end("There was an error completing your registration. Please try again."))
                }
            }
        }

        SessionState::ServiceSelect => {
            let Some(kind) = ServiceKind::from_choice(&text) else {
                return Ok(Turn::next(format!(
                    "Please select a valid service option:\n\n{}",
                    service_options(state)?
                )));
            };
            let Some(service) = catalog_entry(state, kind)? else {
                return Ok(Turn::next("Service not found. Please try again."));
            };
            session.data.service_kind = Some(kind);
            session.data.price = Some(service.price);
            session.state = SessionState::ServiceConfirm;

            let parts = if kind.parts_extra() { "+ (additional for parts)" } else { "" };
            Ok(Turn::next(format!(
                "{} will cost you ₹{}{}. Would you like to proceed?\n\n1. Yes\n2. No",
                kind.label(),
                service.price,
                parts
            )))
        }

        SessionState::ServiceConfirm => match text.as_str() {
            "1" | "yes" => {
                session.state = SessionState::RequesterLocation;
                Ok(Turn::next("Please share your current location so we can find mechanics nearby."))
            }
            "2" | "no" => Ok(Turn::end(
                "Sorry to hear that. Let me know if I can help you with something else.",
            )),
            _ => Ok(Turn::next("Please reply with \"1\" for Yes or \"2\" for No.")),
        },

        SessionState::RequesterLocation => {
            let Some(point) = msg.location else {
                return Ok(Turn::next(ASK_LOCATION_PIN));
            };
            let Some(requester) = resolve_requester(state, lookup, session)? else {
                return Ok(Turn::end(START_OVER));
            };
            let Some(service) = session
                .data
                .service_kind
                .map(|kind| catalog_entry(state, kind))
                .transpose()?
                .flatten()
            else {
                return Ok(Turn::end("Service not found. Please try again."));
            };

            session.data.location = Some(point);
            match dispatch::dispatch(state, &requester, &service, point).await? {
                DispatchOutcome::NoProviders { .. } => Ok(Turn::end(
                    "Sorry, no mechanics are available in your area at the moment. Please try again later.",
                )),
                DispatchOutcome::Broadcast { booking, notified } => {
                    session.data.booking_id = Some(booking.id);
                    session.data.notified_providers = notified;
                    session.state = SessionState::AwaitingProvider;
                    Ok(Turn::next(
                        "We are looking for mechanics in your area. Please wait for confirmation.",
                    ))
                }
            }
        }
    }
}

fn resolve_requester(state: &Arc<AppState>, lookup: &ActorLookup, session: &Session) -> anyhow::Result<Option<Actor>> {
    if let ActorLookup::Requester(actor) = lookup {
        return Ok(Some(actor.clone()));
    }
    match &session.data.requester_id {
        Some(id) => {
            let db = state.db();
            queries::get_actor_by_id(&db, id)
        }
        None => Ok(None),
    }
}

fn catalog_entry(state: &Arc<AppState>, kind: ServiceKind) -> anyhow::Result<Option<Service>> {
    let db = state.db();
    queries::get_service(&db, kind)
}

fn service_options(state: &Arc<AppState>) -> anyhow::Result<String> {
    let services = {
        let db = state.db();
        queries::list_services(&db)?
    };
    Ok(services
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {} ({})", i + 1, s.kind.label(), s.price_label()))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn service_menu(state: &Arc<AppState>) -> anyhow::Result<String> {
    Ok(format!(
        "What kind of service are you looking for?\n\n{}",
        service_options(state)?
    ))
}
