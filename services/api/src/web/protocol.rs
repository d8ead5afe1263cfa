//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the interactive exam screen.

use exam_report_core::session::ScreenView;
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================
// NOTE: The exam image is sent as a raw Binary frame right after `SubmitExam`,
// not as part of this enum.
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Reports the page's query string, e.g. after returning from checkout.
    Navigate { query: String },

    /// Announces an exam. The server answers once the image frame has arrived.
    SubmitExam {
        name: String,
        age: Option<i64>,
        symptoms: Option<String>,
        file_name: String,
        mime_type: String,
    },

    /// Discards the current result and returns to an empty form.
    NewAnalysis,

    /// Opens the upgrade prompt.
    RequestUpgrade,

    /// Starts a subscription checkout from the upgrade prompt.
    StartCheckout,

    /// Leaves the upgrade prompt for the form.
    LeaveUpgrade,

    Logout,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The screen to draw now.
    Screen { view: ScreenView },

    /// A checkout session is ready; the client redirects to the provider.
    Checkout { session_id: String },

    /// The client should replace its query string with `query`.
    ClearPaymentMarker { query: String },

    /// Reports an error that does not change the screen.
    Error { message: String },
}
