mod balls;

use wall::module::ServerModules;

use balls::BallsServer;

/// Server halves this binary knows how to run.
pub fn registry() -> ServerModules {
    let mut modules = ServerModules::new();
    modules.register("balls", BallsServer::create);
    modules
}
