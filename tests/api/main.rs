mod helpers;
mod send_mail;
mod subscribers;
