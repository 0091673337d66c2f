use actix::prelude::*;

use crate::domain::resource_module::ResourceModule;
use crate::error::Error;

impl Actor for ResourceModule {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!(
            "[rank {}] resource service starting (size {}, {} descendants)",
            self.context.rank,
            self.context.size,
            self.context.descendants
        );
        if self.context.is_leader() {
            // Bootstrap continues once the eventlog is loaded.
            self.load_eventlog(ctx);
        } else {
            self.bootstrap(ctx);
        }
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        log::info!("[rank {}] resource service stopping", self.context.rank);
        self.acquire.shutdown();
        for handle in self.get_waiters.drain(..) {
            handle.respond_error(Error::Canceled("module unloaded".to_string()));
        }
        Running::Stop
    }
}
