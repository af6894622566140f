//! Header names used between clients, the gateway, and downstream handlers.

/// Encoded payment payload (client to gateway).
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Optional restatement of the requirements the client paid for, as JSON.
pub const X_PAYMENT_REQUIREMENTS_HEADER: &str = "X-PAYMENT-REQUIREMENTS";

/// `"true"` once a payment has been verified and settled.
///
/// Set by the gateway on the forwarded request and on the response. A
/// client-supplied value is always removed.
pub const X_PAYMENT_VERIFIED_HEADER: &str = "X-PAYMENT-VERIFIED";

/// Verified amount in smallest units.
pub const X_PAYMENT_AMOUNT_HEADER: &str = "X-PAYMENT-AMOUNT";

/// Settlement transaction hash.
pub const X_PAYMENT_TRANSACTION_HEADER: &str = "X-PAYMENT-TRANSACTION";

/// JSON settlement summary.
pub const X_PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Headers the gateway adds to a paid response and lists in
/// `Access-Control-Expose-Headers`.
pub const EXPOSED_PAYMENT_HEADERS: [&str; 4] = [
    X_PAYMENT_VERIFIED_HEADER,
    X_PAYMENT_AMOUNT_HEADER,
    X_PAYMENT_TRANSACTION_HEADER,
    X_PAYMENT_RESPONSE_HEADER,
];
