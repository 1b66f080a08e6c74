mod balls;
mod solid;

use wall::module::ClientModules;

use balls::BallsClient;
use solid::SolidClient;

/// Client halves this binary knows how to draw.
pub fn registry() -> ClientModules {
    let mut modules = ClientModules::new();
    modules.register("balls", BallsClient::create);
    modules.register("solid", SolidClient::create);
    modules
}
