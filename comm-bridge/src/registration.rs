//! Binding registering frontends to channels.
//!
//! A frontend announces itself with `{"command": "register", "target": name}`
//! once it is displayed. The backend opens a reverse connection to `name` and
//! binds it to the first channel still waiting for a transport. When none is
//! waiting, e.g. after a browser reload re-displayed an already bound widget,
//! a fresh channel is created for it. Each channel ends up with at most one
//! transport, whatever order displays and registrations arrive in.

use std::rc::Rc;

use crate::channel::Channel;
use crate::channel_set::ChannelSet;
use crate::error::ChannelError;
use crate::messaging::Registration;
use crate::transport::{Connector, Transport};

impl<C: Connector> ChannelSet<C> {
    /// Open the reverse connection announced by `registration` and bind it.
    pub async fn register(&self, registration: Registration) -> Result<Channel, ChannelError> {
        tracing::debug!(frontend = %registration.target, "registering frontend");
        let transport = self.connector().open(&registration.target).await?;
        self.bind(transport)
    }

    /// Bind `transport` to the first unbound channel, creating one if every
    /// channel is bound already.
    pub fn bind(&self, transport: Rc<dyn Transport>) -> Result<Channel, ChannelError> {
        let unbound = self
            .channels()
            .into_iter()
            .find(|channel| !channel.is_connected());

        let channel = match unbound {
            Some(channel) => channel,
            None => {
                tracing::debug!(comm_target = %self.target(), "no unbound channel, creating one");
                self.create_channel()
            }
        };

        channel.connect(transport)?;
        tracing::info!(channel = %channel.id(), "frontend registered");
        Ok(channel)
    }
}
