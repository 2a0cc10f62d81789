use conductor_core::models::StateType;
use conductor_core::server::ServiceState;
use proptest::prelude::*;

/// Any service state
pub fn service_state_strategy() -> impl Strategy<Value = ServiceState> {
    prop::sample::select(ServiceState::ALL.to_vec())
}

/// Sequences of target states, valid or not
pub fn service_state_path_strategy() -> impl Strategy<Value = Vec<ServiceState>> {
    prop::collection::vec(service_state_strategy(), 1..20)
}

/// Final states a worker reports for a task run
pub fn final_task_state_strategy() -> impl Strategy<Value = StateType> {
    prop::sample::select(vec![
        StateType::Success,
        StateType::Warning,
        StateType::Failed,
        StateType::Killed,
    ])
}

/// Outcomes of the tasks of a flat flow, between 1 and 8 tasks
pub fn task_outcomes_strategy() -> impl Strategy<Value = Vec<StateType>> {
    prop::collection::vec(final_task_state_strategy(), 1..8)
}
