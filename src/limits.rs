/// Max length of a room display name.
pub const MAX_ROOM_NAME_LEN: usize = 255;

/// Max length of each guest name field.
pub const MAX_GUEST_NAME_LEN: usize = 255;

pub const MAX_EMAIL_LEN: usize = 320;

pub const MAX_PHONE_LEN: usize = 64;

pub const MAX_ROOMS: usize = 10_000;

/// Max restrictions held by a single room.
pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;

/// Reject guest fields that are empty or exceed the column limits.
pub fn check_guest(guest: &crate::model::GuestDetails) -> Result<(), crate::error::BookingError> {
    use crate::error::BookingError::LimitExceeded;

    if guest.first_name.trim().is_empty() || guest.first_name.len() > MAX_GUEST_NAME_LEN {
        return Err(LimitExceeded("first name"));
    }
    if guest.last_name.trim().is_empty() || guest.last_name.len() > MAX_GUEST_NAME_LEN {
        return Err(LimitExceeded("last name"));
    }
    if guest.email.trim().is_empty() || guest.email.len() > MAX_EMAIL_LEN {
        return Err(LimitExceeded("email"));
    }
    if guest.phone.len() > MAX_PHONE_LEN {
        return Err(LimitExceeded("phone number"));
    }
    Ok(())
}
